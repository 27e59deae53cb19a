use nix::errno::Errno;

use ssc_api_types::SenseFlags;
use ssc_scsi::{CdbError, SenseData, SenseKey};

#[derive(thiserror::Error, Debug)]
pub enum TapeError {
    /// A CDB field or buffer failed validation, nothing was sent
    #[error("invalid parameter - {0}")]
    ParameterInvalid(#[from] CdbError),
    #[error("transfer length {len} is not a multiple of the block size {blksize}")]
    NotAligned { len: usize, blksize: u32 },
    /// Transport failure or unexpected task status
    #[error("command delivery failed - {0}")]
    DeliveryFailure(String),
    #[error("check condition ({flags:?}) - {}", describe_sense(.sense))]
    CheckCondition {
        flags: SenseFlags,
        sense: Option<SenseData>,
        /// bytes moved before the exception
        transferred: usize,
    },
    #[error("block size {size} out of range ({min} - {max})")]
    OutOfRange { size: u32, min: u32, max: u32 },
    #[error("unable to decode device response - {0}")]
    InvalidResponse(anyhow::Error),
    #[error("device busy")]
    Busy,
    #[error("device not open")]
    NotOpen,
    #[error("no such device")]
    NoDevice,
    #[error("medium is write protected")]
    WriteProtected,
    #[error("tape position unknown")]
    PositionUnknown,
    #[error("operation not supported - {0}")]
    NotSupported(String),
}

fn describe_sense(sense: &Option<SenseData>) -> String {
    match sense {
        Some(sense) => sense.to_string(),
        None => String::from("no sense data"),
    }
}

impl TapeError {
    /// True for check conditions classified with any of `flags`
    pub fn has_sense_flags(&self, flags: SenseFlags) -> bool {
        matches!(self, TapeError::CheckCondition { flags: got, .. } if got.intersects(flags))
    }

    /// Map to the POSIX error code reported to tape operators
    pub fn errno(&self) -> Errno {
        match self {
            TapeError::ParameterInvalid(_)
            | TapeError::NotAligned { .. }
            | TapeError::OutOfRange { .. } => Errno::EINVAL,
            TapeError::DeliveryFailure(_) | TapeError::InvalidResponse(_) => Errno::EIO,
            TapeError::CheckCondition {
                flags,
                sense: Some(sense),
                ..
            } if sense.sense_key == SenseKey::VolumeOverflow
                || (sense.eom && !flags.contains(SenseFlags::BOM)) =>
            {
                Errno::ENOSPC
            }
            TapeError::CheckCondition { .. } => Errno::EIO,
            TapeError::Busy => Errno::EBUSY,
            TapeError::NotOpen => Errno::EBADF,
            TapeError::NoDevice => Errno::ENXIO,
            TapeError::WriteProtected => Errno::EACCES,
            TapeError::PositionUnknown | TapeError::NotSupported(_) => Errno::ENOTSUP,
        }
    }
}
