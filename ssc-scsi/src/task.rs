use std::time::Duration;

use crate::Cdb;

/// Timeout for commands which move the medium (erase, read, write,
/// space, write filemarks, load/unload, rewind)
pub const SSC_MOTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for commands which only query or set state (test unit
/// ready, mode sense/select, read block limits, read position, request
/// sense)
pub const SSC_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Data transfer direction, seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    None,
    /// device to host
    FromDevice,
    /// host to device
    ToDevice,
}

/// Data buffer attached to a task
#[derive(Debug)]
pub enum DataBuffer<'a> {
    None,
    FromDevice(&'a mut [u8]),
    ToDevice(&'a [u8]),
}

impl<'a> DataBuffer<'a> {
    pub fn direction(&self) -> DataDirection {
        match self {
            DataBuffer::None => DataDirection::None,
            DataBuffer::FromDevice(_) => DataDirection::FromDevice,
            DataBuffer::ToDevice(_) => DataDirection::ToDevice,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DataBuffer::None => 0,
            DataBuffer::FromDevice(data) => data.len(),
            DataBuffer::ToDevice(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport level outcome of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceResponse {
    TaskComplete,
    /// The command was not delivered, or the transport timed out
    DeliveryOrTargetFailure,
}

/// SAM task status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Good,
    CheckCondition,
    ConditionMet,
    Busy,
    ReservationConflict,
    TaskSetFull,
    AcaActive,
    TaskAborted,
    Other(u8),
}

impl TaskStatus {
    pub fn from_raw(status: u8) -> Self {
        match status {
            0x00 => TaskStatus::Good,
            0x02 => TaskStatus::CheckCondition,
            0x04 => TaskStatus::ConditionMet,
            0x08 => TaskStatus::Busy,
            0x18 => TaskStatus::ReservationConflict,
            0x28 => TaskStatus::TaskSetFull,
            0x30 => TaskStatus::AcaActive,
            0x40 => TaskStatus::TaskAborted,
            other => TaskStatus::Other(other),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            TaskStatus::Good => 0x00,
            TaskStatus::CheckCondition => 0x02,
            TaskStatus::ConditionMet => 0x04,
            TaskStatus::Busy => 0x08,
            TaskStatus::ReservationConflict => 0x18,
            TaskStatus::TaskSetFull => 0x28,
            TaskStatus::AcaActive => 0x30,
            TaskStatus::TaskAborted => 0x40,
            TaskStatus::Other(status) => status,
        }
    }
}

/// A single SCSI command submission
///
/// Created for one operation and dropped after completion.
pub struct ScsiTask<'a> {
    cdb: Cdb,
    buffer: DataBuffer<'a>,
    timeout: Duration,
}

impl<'a> ScsiTask<'a> {
    pub fn new(cdb: Cdb, buffer: DataBuffer<'a>, timeout: Duration) -> Self {
        Self {
            cdb,
            buffer,
            timeout,
        }
    }

    pub fn cdb(&self) -> &Cdb {
        &self.cdb
    }

    pub fn buffer(&self) -> &DataBuffer<'a> {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut DataBuffer<'a> {
        &mut self.buffer
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Executes tasks against a sequential access device
///
/// Implementations must complete (or time out) a task before `submit`
/// returns. At most one task is in flight per device.
pub trait Transport {
    /// Execute the task and wait for its completion.
    fn submit(&mut self, task: &mut ScsiTask<'_>) -> (ServiceResponse, TaskStatus);

    /// Sense data delivered together with the completion of `task`, if
    /// the transport supports auto-sense.
    fn auto_sense(&self, task: &ScsiTask<'_>) -> Option<Vec<u8>>;

    /// Number of bytes actually moved for `task`.
    fn realized_transfer_count(&self, task: &ScsiTask<'_>) -> usize;
}
