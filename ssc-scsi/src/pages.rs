//! SSC parameter data: mode parameter header/block descriptor, block
//! limits and READ POSITION pages.
//!
//! All structs are `repr(C, packed)` and read/written with
//! `proxmox_io` big endian helpers.

use anyhow::{bail, Error};
use endian_trait::Endian;

use proxmox_io::{ReadExt, WriteExt};

use crate::cdb::{CdbError, MASK_3BYTE};

#[repr(C, packed)]
#[derive(Endian, Debug, Copy, Clone)]
pub struct ModeParameterHeader6 {
    pub mode_data_len: u8,
    pub medium_type: u8,
    pub flags3: u8,
    pub block_descriptor_len: u8,
}

impl ModeParameterHeader6 {
    #[allow(clippy::unusual_byte_groupings)]
    pub fn buffer_mode(&self) -> u8 {
        (self.flags3 & 0b0_111_0000) >> 4
    }

    #[allow(clippy::unusual_byte_groupings)]
    pub fn set_buffer_mode(&mut self, buffer_mode: bool) {
        let mut mode = self.flags3 & 0b1_000_1111;
        if buffer_mode {
            mode |= 0b0_001_0000;
        }
        self.flags3 = mode;
    }

    #[allow(clippy::unusual_byte_groupings)]
    pub fn write_protect(&self) -> bool {
        (self.flags3 & 0b1_000_0000) != 0
    }

    #[allow(clippy::unusual_byte_groupings)]
    pub fn set_write_protect(&mut self, write_protect: bool) {
        let mut flags = self.flags3 & 0b0_111_1111;
        if write_protect {
            flags |= 0b1_000_0000;
        }
        self.flags3 = flags;
    }
}

#[repr(C, packed)]
#[derive(Endian, Debug, Copy, Clone)]
/// SCSI ModeBlockDescriptor for Tape devices
pub struct ModeBlockDescriptor {
    pub density_code: u8,
    pub number_of_blocks: [u8; 3],
    reserved: u8,
    pub block_length: [u8; 3],
}

impl ModeBlockDescriptor {
    pub fn new(density_code: u8, block_length: u32) -> Result<Self, CdbError> {
        let mut descriptor = Self {
            density_code,
            number_of_blocks: [0; 3],
            reserved: 0,
            block_length: [0; 3],
        };
        descriptor.set_block_length(block_length)?;
        Ok(descriptor)
    }

    pub fn block_length(&self) -> u32 {
        ((self.block_length[0] as u32) << 16)
            + ((self.block_length[1] as u32) << 8)
            + (self.block_length[2] as u32)
    }

    pub fn set_block_length(&mut self, length: u32) -> Result<(), CdbError> {
        if length & !MASK_3BYTE != 0 {
            return Err(CdbError::FieldOverflow {
                field: "BLOCK_LENGTH",
                value: length,
                mask: MASK_3BYTE,
            });
        }
        self.block_length[0] = ((length & 0x00ff0000) >> 16) as u8;
        self.block_length[1] = ((length & 0x0000ff00) >> 8) as u8;
        self.block_length[2] = (length & 0x000000ff) as u8;
        Ok(())
    }
}

/// Size of the header plus one block descriptor
pub const MODE_SENSE6_DATA_LEN: usize = 12;

/// MODE SENSE(6) allocation length, room for any mode page data
pub const MODE_SENSE6_ALLOC_LEN: usize = 255;

/// MODE SENSE(6) result without mode pages (page code 0)
///
/// This is also the parameter list we send back with MODE SELECT(6).
#[derive(Debug, Copy, Clone)]
pub struct ModeSense6Data {
    pub header: ModeParameterHeader6,
    pub block_descriptor: Option<ModeBlockDescriptor>,
}

impl ModeSense6Data {
    pub fn new(
        density_code: u8,
        block_length: u32,
        write_protect: bool,
        buffered: bool,
    ) -> Result<Self, CdbError> {
        let mut header = ModeParameterHeader6 {
            mode_data_len: (MODE_SENSE6_DATA_LEN - 1) as u8,
            medium_type: 0,
            flags3: 0,
            block_descriptor_len: 8,
        };
        header.set_write_protect(write_protect);
        header.set_buffer_mode(buffered);

        Ok(Self {
            header,
            block_descriptor: Some(ModeBlockDescriptor::new(density_code, block_length)?),
        })
    }

    /// Decode MODE SENSE(6) data
    ///
    /// The response may be cut off by the allocation length, which is
    /// fine as long as header and block descriptor are complete. Mode
    /// page bytes after the block descriptor are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let mut reader = data;

        let head: ModeParameterHeader6 = unsafe { reader.read_be_value()? };
        let expected_len = head.mode_data_len as usize + 1;
        let header_size = std::mem::size_of::<ModeParameterHeader6>();
        let required_len = header_size + head.block_descriptor_len as usize;

        if expected_len < header_size {
            bail!("mode_data_len {} too small", head.mode_data_len);
        }

        if expected_len < required_len {
            bail!(
                "mode_data_len {} too small for block descriptor",
                head.mode_data_len
            );
        }

        if data.len() < required_len {
            bail!(
                "mode sense data too short: got {}, expected {}",
                data.len(),
                required_len
            );
        }

        if data.len() > expected_len {
            reader = &data[header_size..expected_len];
        }

        Self::decode_block_descriptor(head, reader)
    }

    /// Decode a MODE SELECT(6) parameter list (mode data length is zero)
    pub fn decode_parameter_list(data: &[u8]) -> Result<Self, Error> {
        let mut reader = data;
        let head: ModeParameterHeader6 = unsafe { reader.read_be_value()? };
        Self::decode_block_descriptor(head, reader)
    }

    fn decode_block_descriptor(head: ModeParameterHeader6, mut reader: &[u8]) -> Result<Self, Error> {
        let block_descriptor = match head.block_descriptor_len {
            0 => None,
            8 => Some(unsafe { reader.read_be_value()? }),
            len => bail!("wrong block_descriptor_len: {}, expected 8", len),
        };

        Ok(Self {
            header: head,
            block_descriptor,
        })
    }

    pub fn density_code(&self) -> u8 {
        self.block_descriptor
            .map(|desc| desc.density_code)
            .unwrap_or(0)
    }

    pub fn block_length(&self) -> u32 {
        self.block_descriptor
            .map(|desc| desc.block_length())
            .unwrap_or(0)
    }

    /// Replace the block length, adding a descriptor if there is none.
    pub fn set_block_length(&mut self, length: u32) -> Result<(), CdbError> {
        match self.block_descriptor.as_mut() {
            Some(desc) => desc.set_block_length(length)?,
            None => {
                self.block_descriptor = Some(ModeBlockDescriptor::new(0, length)?);
                self.header.block_descriptor_len = 8;
            }
        }
        Ok(())
    }

    /// Encode as returned by MODE SENSE
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        unsafe {
            data.write_be_value(self.header)?;
            if let Some(desc) = self.block_descriptor {
                data.write_be_value(desc)?;
            }
        }
        data[0] = (data.len() - 1) as u8;
        Ok(data)
    }

    /// Encode as MODE SELECT parameter list (mode data length must be zero)
    pub fn to_parameter_list(&self) -> Result<Vec<u8>, Error> {
        let mut data = self.to_bytes()?;
        data[0] = 0;
        Ok(data)
    }
}

#[repr(C, packed)]
#[derive(Endian, Debug, Copy, Clone)]
/// READ BLOCK LIMITS response
pub struct BlockLimits {
    pub granularity: u8,
    pub max_block_length: [u8; 3],
    pub min_block_length: u16,
}

impl BlockLimits {
    pub fn new(min_block_length: u16, max_block_length: u32) -> Self {
        let max = max_block_length.to_be_bytes();
        Self {
            granularity: 0,
            max_block_length: [max[1], max[2], max[3]],
            min_block_length,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let expected_size = std::mem::size_of::<BlockLimits>();
        if data.len() < expected_size {
            bail!(
                "got short block limits data ({} < {})",
                data.len(),
                expected_size
            );
        }
        let mut reader = data;
        let limits: BlockLimits = unsafe { reader.read_be_value()? };
        Ok(limits)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        unsafe { data.write_be_value(*self)? };
        Ok(data)
    }

    pub fn max_block_length(&self) -> u32 {
        ((self.max_block_length[0] as u32) << 16)
            + ((self.max_block_length[1] as u32) << 8)
            + (self.max_block_length[2] as u32)
    }

    pub fn min_block_length(&self) -> u32 {
        self.min_block_length as u32
    }

    pub fn granularity(&self) -> u8 {
        self.granularity & 0x1f
    }
}

pub const POSITION_FLAG_BOP: u8 = 0x80;
pub const POSITION_FLAG_EOP: u8 = 0x40;
pub const POSITION_FLAG_BPU: u8 = 0x04;

#[repr(C, packed)]
#[derive(Endian, Debug, Copy, Clone)]
/// READ POSITION short form (service action 0x00 and 0x01)
pub struct ReadPositionShortPage {
    pub flags: u8,
    pub partition_number: u8,
    reserved: [u8; 2],
    pub first_block_location: u32,
    pub last_block_location: u32,
    reserved2: u8,
    pub blocks_in_buffer: [u8; 3],
    pub bytes_in_buffer: u32,
}

impl ReadPositionShortPage {
    pub fn new(flags: u8, block_location: u32) -> Self {
        Self {
            flags,
            partition_number: 0,
            reserved: [0; 2],
            first_block_location: block_location,
            last_block_location: block_location,
            reserved2: 0,
            blocks_in_buffer: [0; 3],
            bytes_in_buffer: 0,
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let expected_size = std::mem::size_of::<ReadPositionShortPage>();
        if data.len() != expected_size {
            bail!(
                "got unexpected data len ({} != {})",
                data.len(),
                expected_size
            );
        }
        let mut reader = data;
        let page: ReadPositionShortPage = unsafe { reader.read_be_value()? };
        Ok(page)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        unsafe { data.write_be_value(*self)? };
        Ok(data)
    }

    /// Beginning of partition
    pub fn bop(&self) -> bool {
        self.flags & POSITION_FLAG_BOP != 0
    }

    /// End of partition (early warning)
    pub fn eop(&self) -> bool {
        self.flags & POSITION_FLAG_EOP != 0
    }

    /// Block position unknown
    pub fn position_unknown(&self) -> bool {
        self.flags & POSITION_FLAG_BPU != 0
    }
}

#[repr(C, packed)]
#[derive(Endian, Debug, Copy, Clone)]
/// READ POSITION long form (service action 0x06)
pub struct ReadPositionLongPage {
    pub flags: u8,
    reserved: [u8; 3],
    pub partition_number: u32,
    pub logical_object_number: u64,
    pub logical_file_id: u64,
    obsolete: [u8; 8],
}

impl ReadPositionLongPage {
    pub fn new(flags: u8, logical_object_number: u64, logical_file_id: u64) -> Self {
        Self {
            flags,
            reserved: [0; 3],
            partition_number: 0,
            logical_object_number,
            logical_file_id,
            obsolete: [0; 8],
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        let expected_size = std::mem::size_of::<ReadPositionLongPage>();
        if data.len() != expected_size {
            bail!(
                "got unexpected data len ({} != {})",
                data.len(),
                expected_size
            );
        }
        let mut reader = data;
        let page: ReadPositionLongPage = unsafe { reader.read_be_value()? };
        Ok(page)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut data = Vec::new();
        unsafe { data.write_be_value(*self)? };
        Ok(data)
    }

    /// Block position unknown (MPU)
    pub fn position_unknown(&self) -> bool {
        self.flags & POSITION_FLAG_BPU != 0
    }
}
