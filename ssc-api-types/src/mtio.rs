//! Magnetic tape operator interface
//!
//! Operation numbers follow the BSD `sys/mtio.h` layout (`MTIOCTOP`).

use serde::{Deserialize, Serialize};

use proxmox_schema::api;

/// Tape operations (`mt_op`)
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MtOp {
    WriteEof = 0,             /* write an end-of-file record */
    ForwardSpaceFile = 1,     /* forward space file */
    BackwardSpaceFile = 2,    /* backward space file */
    ForwardSpaceRecord = 3,   /* forward space record */
    BackwardSpaceRecord = 4,  /* backward space record */
    Rewind = 5,               /* rewind */
    Offline = 6,              /* rewind and put the drive offline */
    Nop = 7,                  /* no operation, sets status only */
    Cache = 8,                /* enable controller cache */
    NoCache = 9,              /* disable controller cache */
    SetBlockSize = 10,        /* set block size, 0 for variable */
    SetDensity = 11,          /* set density */
    Erase = 12,               /* erase to EOM */
    EndOfData = 13,           /* space to EOM */
    Compression = 14,         /* select compression mode */
    Retension = 15,           /* re-tension tape */
    WriteSetmarks = 16,       /* write setmark(s) */
    ForwardSpaceSetmark = 17, /* forward space setmark */
    BackwardSpaceSetmark = 18,/* backward space setmark */
    Load = 19,                /* load tape in drive */
    WriteEofImmediate = 20,   /* write an end-of-file record without waiting */
}

impl TryFrom<i16> for MtOp {
    type Error = i16;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        let op = match value {
            0 => MtOp::WriteEof,
            1 => MtOp::ForwardSpaceFile,
            2 => MtOp::BackwardSpaceFile,
            3 => MtOp::ForwardSpaceRecord,
            4 => MtOp::BackwardSpaceRecord,
            5 => MtOp::Rewind,
            6 => MtOp::Offline,
            7 => MtOp::Nop,
            8 => MtOp::Cache,
            9 => MtOp::NoCache,
            10 => MtOp::SetBlockSize,
            11 => MtOp::SetDensity,
            12 => MtOp::Erase,
            13 => MtOp::EndOfData,
            14 => MtOp::Compression,
            15 => MtOp::Retension,
            16 => MtOp::WriteSetmarks,
            17 => MtOp::ForwardSpaceSetmark,
            18 => MtOp::BackwardSpaceSetmark,
            19 => MtOp::Load,
            20 => MtOp::WriteEofImmediate,
            other => return Err(other),
        };
        Ok(op)
    }
}

/// A single tape operation request (`struct mtop`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtOpRequest {
    pub op: MtOp,
    pub count: i32,
}

impl MtOpRequest {
    pub fn new(op: MtOp, count: i32) -> Self {
        Self { op, count }
    }
}

bitflags::bitflags! {
    /// Device state flags, reported raw in [MtGet::flags]
    #[derive(Default)]
    pub struct TapeStateFlags: u32 {
        const OPEN = 0x01;
        const READ_ONLY = 0x02;
        const BUFFERED = 0x04;
        /// data was written since open (persistent)
        const WRITTEN = 0x08;
        /// set for exactly one dispatch, turns into WRITTEN on success
        const WRITE_PENDING = 0x10;
    }
}

bitflags::bitflags! {
    /// Classified exception of the last command, reported raw in
    /// [MtGet::sense_flags]
    #[derive(Default)]
    pub struct SenseFlags: u32 {
        /// logical unit is becoming ready
        const NOTREADY = 0x01;
        /// beginning of medium detected
        const BOM = 0x02;
        /// end of data detected
        const EOD = 0x04;
        /// filemark detected
        const FILEMARK = 0x08;
    }
}

#[api()]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
/// Tape device status (`struct mtget`)
pub struct MtGet {
    /// Block size (0 means variable block mode)
    pub blksize: u32,
    /// Density code
    pub density: u8,
    /// Minimum block size reported by the device (0 if unknown)
    pub blkmin: u32,
    /// Maximum block size reported by the device (0 if unknown)
    pub blkmax: u32,
    /// Current file number (-1 if unknown)
    pub fileno: i32,
    /// Current block number inside the file (-1 if unknown)
    pub blkno: i32,
    /// Raw device state flags
    pub flags: u32,
    /// Raw sense classification flags of the last command
    pub sense_flags: u32,
}

/// Requests accepted by the ioctl style entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtIoctl {
    /// generic tape operation (`MTIOCTOP`)
    Op(MtOpRequest),
    /// get status (`MTIOCGET`)
    GetStatus,
    /// logical block address (`MTIOCRDSPOS`)
    ReadLogicalPosition,
    /// hardware block address (`MTIOCRDHPOS`)
    ReadHardwarePosition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MtIoctlReply {
    Done,
    Status(MtGet),
    Position(u32),
}
