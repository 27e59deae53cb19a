//! Command dispatcher
//!
//! Submits one task at a time, turns the completion into a result and
//! fetches sense data on CHECK CONDITION. Commands are never retried,
//! only REQUEST SENSE gets a second chance.

use ssc_api_types::SenseFlags;
use ssc_scsi::cdb::scsi_cmd_request_sense;
use ssc_scsi::sense::interpret_sense;
use ssc_scsi::{
    DataBuffer, ScsiTask, SenseData, ServiceResponse, TaskStatus, Transport, SSC_QUERY_TIMEOUT,
};

use super::{TapeError, TapeState};

/// REQUEST SENSE allocation length
const REQUEST_SENSE_LEN: usize = 252;

const REQUEST_SENSE_ATTEMPTS: usize = 2;

pub struct CommandDispatcher<T> {
    transport: T,
}

impl<T: Transport> CommandDispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Execute a task, returns the realized transfer count
    ///
    /// The write pending toggle in `state` is consumed by this call,
    /// and turns into the persistent WRITTEN flag if the task succeeds.
    pub fn execute(
        &mut self,
        state: &mut TapeState,
        task: &mut ScsiTask<'_>,
    ) -> Result<usize, TapeError> {
        let write_pending = state.take_write_pending();
        state.clear_sense();

        log::debug!("submit {:?}", task.cdb());

        let (response, status) = self.transport.submit(task);

        if response != ServiceResponse::TaskComplete {
            log::error!("{:?} failed - service response {:?}", task.cdb(), response);
            return Err(TapeError::DeliveryFailure(format!(
                "service response {:?}",
                response
            )));
        }

        match status {
            TaskStatus::Good => {
                if write_pending {
                    state.set_written(true);
                }
                Ok(self.transport.realized_transfer_count(task))
            }
            TaskStatus::CheckCondition => {
                // fetch this before REQUEST SENSE replaces the completion
                let transferred = self.transport.realized_transfer_count(task);
                let (sense, flags) = self.interpret(task);
                state.set_sense(flags, sense);
                Err(TapeError::CheckCondition {
                    flags,
                    sense,
                    transferred,
                })
            }
            other => {
                log::error!(
                    "{:?} failed - unexpected task status {:#04x}",
                    task.cdb(),
                    other.raw()
                );
                Err(TapeError::DeliveryFailure(format!(
                    "unexpected task status {:#04x}",
                    other.raw()
                )))
            }
        }
    }

    /// Get sense data for a failed task and classify it
    fn interpret(&mut self, task: &ScsiTask<'_>) -> (Option<SenseData>, SenseFlags) {
        let raw = match self.transport.auto_sense(task) {
            Some(raw) => Some(raw),
            None => self.request_sense(),
        };

        match raw {
            Some(raw) => interpret_sense(&raw),
            None => {
                log::warn!("{:?}: unable to retrieve sense data", task.cdb());
                (None, SenseFlags::empty())
            }
        }
    }

    fn request_sense(&mut self) -> Option<Vec<u8>> {
        for attempt in 1..=REQUEST_SENSE_ATTEMPTS {
            match self.try_request_sense() {
                Ok(data) => return Some(data),
                Err(err) => log::debug!("request sense (attempt {attempt}) failed - {err}"),
            }
        }
        None
    }

    fn try_request_sense(&mut self) -> Result<Vec<u8>, TapeError> {
        let mut buffer = vec![0u8; REQUEST_SENSE_LEN];

        let cdb = scsi_cmd_request_sense(
            0,
            REQUEST_SENSE_LEN as u32,
            &DataBuffer::FromDevice(&mut buffer),
        )?;

        let mut task = ScsiTask::new(cdb, DataBuffer::FromDevice(&mut buffer), SSC_QUERY_TIMEOUT);

        match self.transport.submit(&mut task) {
            (ServiceResponse::TaskComplete, TaskStatus::Good) => (),
            (response, status) => {
                return Err(TapeError::DeliveryFailure(format!(
                    "{:?}, status {:#04x}",
                    response,
                    status.raw()
                )))
            }
        }

        let len = self.transport.realized_transfer_count(&task);
        drop(task);

        buffer.truncate(len.min(REQUEST_SENSE_LEN));
        Ok(buffer)
    }
}
