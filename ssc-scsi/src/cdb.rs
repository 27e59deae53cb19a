//! SSC command descriptor blocks
//!
//! Every builder checks each field against its declared width and
//! fails with [CdbError] instead of truncating. The single implicit
//! transformation is the reduction of small negative SPACE counts to
//! their 24 bit two's complement form (see [space_count_field]).
//!
//! The control byte is always zero.

use crate::{DataBuffer, DataDirection};

pub const MAX_CDB_LEN: usize = 16;

pub const MASK_1BIT: u32 = 0x01;
pub const MASK_2BIT: u32 = 0x03;
pub const MASK_3BIT: u32 = 0x07;
pub const MASK_4BIT: u32 = 0x0f;
pub const MASK_5BIT: u32 = 0x1f;
pub const MASK_6BIT: u32 = 0x3f;
pub const MASK_1BYTE: u32 = 0xff;
pub const MASK_2BYTE: u32 = 0xffff;
pub const MASK_3BYTE: u32 = 0xff_ffff;

/// Size of the READ BLOCK LIMITS response
pub const READ_BLOCK_LIMITS_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SscOpcode {
    TestUnitReady = 0x00,
    Rewind = 0x01,
    RequestSense = 0x03,
    ReadBlockLimits = 0x05,
    Read6 = 0x08,
    Write6 = 0x0a,
    WriteFilemarks6 = 0x10,
    Space6 = 0x11,
    ModeSelect6 = 0x15,
    Erase = 0x19,
    ModeSense6 = 0x1a,
    LoadUnload = 0x1b,
    ReadPosition = 0x34,
}

impl SscOpcode {
    pub fn from_code(code: u8) -> Option<Self> {
        let opcode = match code {
            0x00 => SscOpcode::TestUnitReady,
            0x01 => SscOpcode::Rewind,
            0x03 => SscOpcode::RequestSense,
            0x05 => SscOpcode::ReadBlockLimits,
            0x08 => SscOpcode::Read6,
            0x0a => SscOpcode::Write6,
            0x10 => SscOpcode::WriteFilemarks6,
            0x11 => SscOpcode::Space6,
            0x15 => SscOpcode::ModeSelect6,
            0x19 => SscOpcode::Erase,
            0x1a => SscOpcode::ModeSense6,
            0x1b => SscOpcode::LoadUnload,
            0x34 => SscOpcode::ReadPosition,
            _ => return None,
        };
        Some(opcode)
    }
}

/// CDB construction failures. All of them mean "invalid parameter",
/// nothing was sent to the device.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CdbError {
    #[error("field {field} value {value:#x} exceeds mask {mask:#x}")]
    FieldOverflow {
        field: &'static str,
        value: u32,
        mask: u32,
    },
    #[error("missing data buffer")]
    MissingBuffer,
    #[error("wrong data direction (expected {expected:?}, got {got:?})")]
    WrongDirection {
        expected: DataDirection,
        got: DataDirection,
    },
    #[error("data buffer too small ({len} < {required})")]
    BufferTooSmall { len: usize, required: usize },
}

/// SPACE type selector (4 bit CODE field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceCode {
    Blocks,
    Filemarks,
    SequentialFilemarks,
    EndOfData,
}

impl SpaceCode {
    pub fn code(self) -> u8 {
        match self {
            SpaceCode::Blocks => 0x00,
            SpaceCode::Filemarks => 0x01,
            SpaceCode::SequentialFilemarks => 0x02,
            SpaceCode::EndOfData => 0x03,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(SpaceCode::Blocks),
            0x01 => Some(SpaceCode::Filemarks),
            0x02 => Some(SpaceCode::SequentialFilemarks),
            0x03 => Some(SpaceCode::EndOfData),
            _ => None,
        }
    }
}

/// READ POSITION service action (5 bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPositionAction {
    /// short form, block id
    ShortBlockId,
    /// short form, vendor specific (hardware) block address
    ShortVendorSpecific,
    LongForm,
    ExtendedForm,
    Reserved(u8),
}

impl ReadPositionAction {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => ReadPositionAction::ShortBlockId,
            0x01 => ReadPositionAction::ShortVendorSpecific,
            0x06 => ReadPositionAction::LongForm,
            0x08 => ReadPositionAction::ExtendedForm,
            other => ReadPositionAction::Reserved(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            ReadPositionAction::ShortBlockId => 0x00,
            ReadPositionAction::ShortVendorSpecific => 0x01,
            ReadPositionAction::LongForm => 0x06,
            ReadPositionAction::ExtendedForm => 0x08,
            ReadPositionAction::Reserved(code) => code,
        }
    }

    /// Expected response length, `None` if the caller decides
    pub fn response_len(self) -> Option<usize> {
        match self {
            ReadPositionAction::ShortBlockId | ReadPositionAction::ShortVendorSpecific => Some(20),
            ReadPositionAction::LongForm => Some(32),
            ReadPositionAction::ExtendedForm => Some(28),
            ReadPositionAction::Reserved(_) => None,
        }
    }
}

/// A validated, wire exact command descriptor block
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; MAX_CDB_LEN],
    len: usize,
    transfer_len: usize,
}

impl Cdb {
    fn new(cmd: &[u8], transfer_len: usize) -> Self {
        let mut bytes = [0u8; MAX_CDB_LEN];
        bytes[..cmd.len()].copy_from_slice(cmd);
        Self {
            bytes,
            len: cmd.len(),
            transfer_len,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// Number of bytes the command is expected to move
    pub fn transfer_len(&self) -> usize {
        self.transfer_len
    }
}

impl std::fmt::Debug for Cdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cdb({})", hex::encode(self.as_bytes()))
    }
}

fn check_field(field: &'static str, value: u32, mask: u32) -> Result<u32, CdbError> {
    if value & !mask != 0 {
        return Err(CdbError::FieldOverflow { field, value, mask });
    }
    Ok(value)
}

fn check_buffer(
    buffer: &DataBuffer<'_>,
    expected: DataDirection,
    required: usize,
) -> Result<(), CdbError> {
    match buffer.direction() {
        DataDirection::None => return Err(CdbError::MissingBuffer),
        got if got != expected => return Err(CdbError::WrongDirection { expected, got }),
        _ => (),
    }
    if buffer.len() < required {
        return Err(CdbError::BufferTooSmall {
            len: buffer.len(),
            required,
        });
    }
    Ok(())
}

fn be24(value: u32) -> [u8; 3] {
    let bytes = value.to_be_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

/// Bytes moved by READ(6)/WRITE(6), `None` if not addressable
pub fn required_transfer_count(fixed: bool, transfer_length: u32, block_size: u32) -> Option<usize> {
    let transfer_length = usize::try_from(transfer_length).ok()?;
    if fixed {
        transfer_length.checked_mul(usize::try_from(block_size).ok()?)
    } else {
        Some(transfer_length)
    }
}

fn transfer_count(
    buffer: &DataBuffer<'_>,
    fixed: u32,
    transfer_length: u32,
    block_size: u32,
) -> Result<usize, CdbError> {
    required_transfer_count(fixed != 0, transfer_length, block_size).ok_or(
        CdbError::BufferTooSmall {
            len: buffer.len(),
            required: usize::MAX,
        },
    )
}

/// Reduce a signed SPACE count to the 3 byte COUNT field
///
/// Values with bits 31..23 set are small negative numbers and keep
/// their low 24 bits, everything else must fit as is.
pub fn space_count_field(count: i32) -> Result<u32, CdbError> {
    let mut value = count as u32;
    if value & 0xff80_0000 == 0xff80_0000 {
        value &= MASK_3BYTE;
    }
    check_field("COUNT", value, MASK_3BYTE)
}

pub fn scsi_cmd_erase(long: u8, immed: u8) -> Result<Cdb, CdbError> {
    let long = check_field("LONG", long.into(), MASK_1BIT)?;
    let immed = check_field("IMMED", immed.into(), MASK_1BIT)?;

    let cmd = [
        SscOpcode::Erase as u8,
        ((long << 1) | immed) as u8,
        0, // reserved
        0,
        0,
        0, // control
    ];
    Ok(Cdb::new(&cmd, 0))
}

pub fn scsi_cmd_read6(
    sili: u8,
    fixed: u8,
    transfer_length: u32,
    block_size: u32,
    buffer: &DataBuffer<'_>,
) -> Result<Cdb, CdbError> {
    let sili = check_field("SILI", sili.into(), MASK_1BIT)?;
    let fixed = check_field("FIXED", fixed.into(), MASK_1BIT)?;
    let transfer_length = check_field("TRANSFER_LENGTH", transfer_length, MASK_3BYTE)?;

    let count = transfer_count(buffer, fixed, transfer_length, block_size)?;
    check_buffer(buffer, DataDirection::FromDevice, count)?;

    let tl = be24(transfer_length);
    let cmd = [
        SscOpcode::Read6 as u8,
        ((sili << 1) | fixed) as u8,
        tl[0],
        tl[1],
        tl[2],
        0, // control
    ];
    Ok(Cdb::new(&cmd, count))
}

pub fn scsi_cmd_write6(
    fixed: u8,
    transfer_length: u32,
    block_size: u32,
    buffer: &DataBuffer<'_>,
) -> Result<Cdb, CdbError> {
    let fixed = check_field("FIXED", fixed.into(), MASK_1BIT)?;
    let transfer_length = check_field("TRANSFER_LENGTH", transfer_length, MASK_3BYTE)?;

    let count = transfer_count(buffer, fixed, transfer_length, block_size)?;
    check_buffer(buffer, DataDirection::ToDevice, count)?;

    let tl = be24(transfer_length);
    let cmd = [
        SscOpcode::Write6 as u8,
        fixed as u8,
        tl[0],
        tl[1],
        tl[2],
        0, // control
    ];
    Ok(Cdb::new(&cmd, count))
}

pub fn scsi_cmd_space6(code: SpaceCode, count: i32) -> Result<Cdb, CdbError> {
    let code = check_field("CODE", code.code().into(), MASK_4BIT)?;
    let count = be24(space_count_field(count)?);

    let cmd = [
        SscOpcode::Space6 as u8,
        code as u8,
        count[0],
        count[1],
        count[2],
        0, // control
    ];
    Ok(Cdb::new(&cmd, 0))
}

pub fn scsi_cmd_write_filemarks6(wsmk: u8, immed: u8, count: u32) -> Result<Cdb, CdbError> {
    let wsmk = check_field("WSMK", wsmk.into(), MASK_1BIT)?;
    let immed = check_field("IMMED", immed.into(), MASK_1BIT)?;
    let count = be24(check_field("TRANSFER_LENGTH", count, MASK_3BYTE)?);

    let cmd = [
        SscOpcode::WriteFilemarks6 as u8,
        ((wsmk << 1) | immed) as u8,
        count[0],
        count[1],
        count[2],
        0, // control
    ];
    Ok(Cdb::new(&cmd, 0))
}

pub fn scsi_cmd_load_unload(
    immed: u8,
    hold: u8,
    eot: u8,
    reten: u8,
    load: u8,
) -> Result<Cdb, CdbError> {
    let immed = check_field("IMMED", immed.into(), MASK_1BIT)?;
    let hold = check_field("HOLD", hold.into(), MASK_1BIT)?;
    let eot = check_field("EOT", eot.into(), MASK_1BIT)?;
    let reten = check_field("RETEN", reten.into(), MASK_1BIT)?;
    let load = check_field("LOAD", load.into(), MASK_1BIT)?;

    let cmd = [
        SscOpcode::LoadUnload as u8,
        immed as u8,
        0, // reserved
        0,
        ((hold << 3) | (eot << 2) | (reten << 1) | load) as u8,
        0, // control
    ];
    Ok(Cdb::new(&cmd, 0))
}

pub fn scsi_cmd_read_block_limits(buffer: &DataBuffer<'_>) -> Result<Cdb, CdbError> {
    check_buffer(buffer, DataDirection::FromDevice, READ_BLOCK_LIMITS_LEN)?;

    let cmd = [SscOpcode::ReadBlockLimits as u8, 0, 0, 0, 0, 0];
    Ok(Cdb::new(&cmd, READ_BLOCK_LIMITS_LEN))
}

pub fn scsi_cmd_read_position(
    service_action: u8,
    allocation_length: u32,
    buffer: &DataBuffer<'_>,
) -> Result<Cdb, CdbError> {
    let service_action = check_field("SERVICE_ACTION", service_action.into(), MASK_5BIT)?;
    let allocation_length = check_field("ALLOCATION_LENGTH", allocation_length, MASK_2BYTE)?;

    let expected_len = ReadPositionAction::from_code(service_action as u8)
        .response_len()
        .unwrap_or_else(|| buffer.len());
    check_buffer(buffer, DataDirection::FromDevice, expected_len)?;

    let al = (allocation_length as u16).to_be_bytes();
    let cmd = [
        SscOpcode::ReadPosition as u8,
        service_action as u8,
        0, // reserved
        0,
        0,
        0,
        0,
        al[0],
        al[1],
        0, // control
    ];
    Ok(Cdb::new(&cmd, expected_len))
}

pub fn scsi_cmd_rewind(immed: u8) -> Result<Cdb, CdbError> {
    let immed = check_field("IMMED", immed.into(), MASK_1BIT)?;

    let cmd = [SscOpcode::Rewind as u8, immed as u8, 0, 0, 0, 0];
    Ok(Cdb::new(&cmd, 0))
}

pub fn scsi_cmd_mode_sense6(
    disable_block_descriptor: u8,
    page_control: u8,
    page_code: u8,
    sub_page_code: u8,
    allocation_length: u32,
    buffer: &DataBuffer<'_>,
) -> Result<Cdb, CdbError> {
    let dbd = check_field("DBD", disable_block_descriptor.into(), MASK_1BIT)?;
    let pc = check_field("PC", page_control.into(), MASK_2BIT)?;
    let page_code = check_field("PAGE_CODE", page_code.into(), MASK_6BIT)?;
    let allocation_length = check_field("ALLOCATION_LENGTH", allocation_length, MASK_1BYTE)?;

    check_buffer(buffer, DataDirection::FromDevice, allocation_length as usize)?;

    let cmd = [
        SscOpcode::ModeSense6 as u8,
        (dbd << 3) as u8,
        ((pc << 6) | page_code) as u8,
        sub_page_code,
        allocation_length as u8,
        0, // control
    ];
    Ok(Cdb::new(&cmd, allocation_length as usize))
}

pub fn scsi_cmd_mode_select6(
    page_format: u8,
    save_pages: u8,
    param_list_len: u32,
    buffer: &DataBuffer<'_>,
) -> Result<Cdb, CdbError> {
    let pf = check_field("PF", page_format.into(), MASK_1BIT)?;
    let sp = check_field("SP", save_pages.into(), MASK_1BIT)?;
    let param_list_len = check_field("PARAMETER_LIST_LENGTH", param_list_len, MASK_1BYTE)?;

    check_buffer(buffer, DataDirection::ToDevice, param_list_len as usize)?;

    let cmd = [
        SscOpcode::ModeSelect6 as u8,
        ((pf << 4) | sp) as u8,
        0, // reserved
        0,
        param_list_len as u8,
        0, // control
    ];
    Ok(Cdb::new(&cmd, param_list_len as usize))
}

pub fn scsi_cmd_test_unit_ready() -> Cdb {
    Cdb::new(&[SscOpcode::TestUnitReady as u8, 0, 0, 0, 0, 0], 0)
}

pub fn scsi_cmd_request_sense(
    descriptor_format: u8,
    allocation_length: u32,
    buffer: &DataBuffer<'_>,
) -> Result<Cdb, CdbError> {
    let desc = check_field("DESC", descriptor_format.into(), MASK_1BIT)?;
    let allocation_length = check_field("ALLOCATION_LENGTH", allocation_length, MASK_1BYTE)?;

    check_buffer(buffer, DataDirection::FromDevice, allocation_length as usize)?;

    let cmd = [
        SscOpcode::RequestSense as u8,
        desc as u8,
        0, // reserved
        0,
        allocation_length as u8,
        0, // control
    ];
    Ok(Cdb::new(&cmd, allocation_length as usize))
}
