//! Fixed format sense data
//!
//! Only "current error, fixed format" sense data (response code 0x70)
//! is classified. See [SenseData::classify] for the rules.

use anyhow::{bail, Error};
use endian_trait::Endian;

use proxmox_io::ReadExt;

use ssc_api_types::SenseFlags;

/// Response code for current errors in fixed format
pub const SENSE_RESPONSE_CURRENT_FIXED: u8 = 0x70;

pub const SENSE_FLAG_FILEMARK: u8 = 0x80;
pub const SENSE_FLAG_EOM: u8 = 0x40;
pub const SENSE_FLAG_ILI: u8 = 0x20;

/// Minimum length covering the sense key, ASC and ASCQ
pub const SENSE_MIN_LEN: usize = 14;

/// Sense key (4 bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenseKey {
    NoSense,
    RecoveredError,
    NotReady,
    MediumError,
    HardwareError,
    IllegalRequest,
    UnitAttention,
    DataProtect,
    BlankCheck,
    VendorSpecific,
    CopyAborted,
    AbortedCommand,
    Equal,
    VolumeOverflow,
    Miscompare,
    Unknown,
}

impl SenseKey {
    pub fn from_code(code: u8) -> Self {
        match code & 0x0f {
            0x00 => SenseKey::NoSense,
            0x01 => SenseKey::RecoveredError,
            0x02 => SenseKey::NotReady,
            0x03 => SenseKey::MediumError,
            0x04 => SenseKey::HardwareError,
            0x05 => SenseKey::IllegalRequest,
            0x06 => SenseKey::UnitAttention,
            0x07 => SenseKey::DataProtect,
            0x08 => SenseKey::BlankCheck,
            0x09 => SenseKey::VendorSpecific,
            0x0a => SenseKey::CopyAborted,
            0x0b => SenseKey::AbortedCommand,
            0x0c => SenseKey::Equal,
            0x0d => SenseKey::VolumeOverflow,
            0x0e => SenseKey::Miscompare,
            _ => SenseKey::Unknown,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SenseKey::NoSense => 0x00,
            SenseKey::RecoveredError => 0x01,
            SenseKey::NotReady => 0x02,
            SenseKey::MediumError => 0x03,
            SenseKey::HardwareError => 0x04,
            SenseKey::IllegalRequest => 0x05,
            SenseKey::UnitAttention => 0x06,
            SenseKey::DataProtect => 0x07,
            SenseKey::BlankCheck => 0x08,
            SenseKey::VendorSpecific => 0x09,
            SenseKey::CopyAborted => 0x0a,
            SenseKey::AbortedCommand => 0x0b,
            SenseKey::Equal => 0x0c,
            SenseKey::VolumeOverflow => 0x0d,
            SenseKey::Miscompare => 0x0e,
            SenseKey::Unknown => 0x0f,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SenseKey::NoSense => "No Sense",
            SenseKey::RecoveredError => "Recovered Error",
            SenseKey::NotReady => "Not Ready",
            SenseKey::MediumError => "Medium Error",
            SenseKey::HardwareError => "Hardware Error",
            SenseKey::IllegalRequest => "Illegal Request",
            SenseKey::UnitAttention => "Unit Attention",
            SenseKey::DataProtect => "Data Protect",
            SenseKey::BlankCheck => "Blank Check",
            SenseKey::VendorSpecific => "Vendor specific",
            SenseKey::CopyAborted => "Copy Aborted",
            SenseKey::AbortedCommand => "Aborted Command",
            SenseKey::Equal => "Equal",
            SenseKey::VolumeOverflow => "Volume Overflow",
            SenseKey::Miscompare => "Miscompare",
            SenseKey::Unknown => "(Unknown)",
        }
    }
}

impl std::fmt::Display for SenseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[repr(C, packed)]
#[derive(Endian, Debug)]
pub struct RequestSenseFixed {
    pub response_code: u8,
    obsolete: u8,
    pub flags2: u8,
    pub information: [u8; 4],
    pub additional_sense_len: u8,
    pub command_specific_information: [u8; 4],
    pub additional_sense_code: u8,
    pub additional_sense_code_qualifier: u8,
    pub field_replaceable_unit_code: u8,
    pub sense_key_specific: [u8; 3],
}

/// Decoded sense data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    pub response_code: u8,
    pub sense_key: SenseKey,
    pub filemark: bool,
    pub eom: bool,
    pub ili: bool,
    pub asc: u8,
    pub ascq: u8,
    /// INFORMATION field (residue), only meaningful if `valid` is set
    pub information: u32,
    pub valid: bool,
}

impl SenseData {
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        if data.len() < SENSE_MIN_LEN {
            bail!("got short sense data ({} bytes)", data.len());
        }

        // devices may return less than the full fixed format
        let mut raw = [0u8; std::mem::size_of::<RequestSenseFixed>()];
        let len = data.len().min(raw.len());
        raw[..len].copy_from_slice(&data[..len]);

        let mut reader = &raw[..];
        let sense: RequestSenseFixed = unsafe { reader.read_be_value()? };

        let response_code = sense.response_code & 0x7f;
        if response_code != 0x70 && response_code != 0x71 {
            bail!("unsupported sense response code {:#04x}", response_code);
        }

        Ok(Self {
            response_code,
            sense_key: SenseKey::from_code(sense.flags2),
            filemark: sense.flags2 & SENSE_FLAG_FILEMARK != 0,
            eom: sense.flags2 & SENSE_FLAG_EOM != 0,
            ili: sense.flags2 & SENSE_FLAG_ILI != 0,
            asc: sense.additional_sense_code,
            ascq: sense.additional_sense_code_qualifier,
            information: u32::from_be_bytes(sense.information),
            valid: sense.response_code & 0x80 != 0,
        })
    }

    pub fn is_current_fixed(&self) -> bool {
        self.response_code == SENSE_RESPONSE_CURRENT_FIXED
    }

    /// Classify the exception, first match wins:
    ///
    /// 1. NOT READY, 04/01 (becoming ready) => NOTREADY
    /// 2. NO SENSE, 00/04 => BOM
    /// 3. BLANK CHECK, 00/05 => EOD
    /// 4. filemark bit, or NO SENSE 00/01 => FILEMARK
    ///
    /// Anything else (and deferred errors) yields no flag.
    pub fn classify(&self) -> SenseFlags {
        if !self.is_current_fixed() {
            return SenseFlags::empty();
        }

        match (self.sense_key, self.asc, self.ascq) {
            (SenseKey::NotReady, 0x04, 0x01) => SenseFlags::NOTREADY,
            (SenseKey::NoSense, 0x00, 0x04) => SenseFlags::BOM,
            (SenseKey::BlankCheck, 0x00, 0x05) => SenseFlags::EOD,
            (SenseKey::NoSense, 0x00, 0x01) => SenseFlags::FILEMARK,
            _ if self.filemark => SenseFlags::FILEMARK,
            _ => SenseFlags::empty(),
        }
    }
}

impl std::fmt::Display for SenseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, ASC/ASCQ {:02x}/{:02x}",
            self.sense_key, self.asc, self.ascq
        )?;
        if self.filemark {
            write!(f, ", filemark")?;
        }
        if self.eom {
            write!(f, ", end of medium")?;
        }
        if self.ili {
            write!(f, ", incorrect length")?;
        }
        Ok(())
    }
}

/// Decode and classify raw sense bytes, logging what we can not map
pub fn interpret_sense(raw: &[u8]) -> (Option<SenseData>, SenseFlags) {
    let sense = match SenseData::decode(raw) {
        Ok(sense) => sense,
        Err(err) => {
            log::warn!("unable to decode sense data - {err} ({})", hex::encode(raw));
            return (None, SenseFlags::empty());
        }
    };

    if sense.ili {
        log::info!("incorrect length indicated (information {})", sense.information as i32);
    }

    if !sense.is_current_fixed() {
        log::warn!(
            "not classifying sense response code {:#04x} ({})",
            sense.response_code,
            sense
        );
        return (Some(sense), SenseFlags::empty());
    }

    let flags = sense.classify();
    if flags.is_empty() {
        log::warn!("{sense}");
        log::debug!("sense data: {}", hex::encode(raw));
    }

    (Some(sense), flags)
}
