use std::collections::VecDeque;

use ssc_scsi::{DataBuffer, ScsiTask, ServiceResponse, TaskStatus, Transport};

mod operator;
mod registry;
mod virtual_tape;

/// Canned completion for one submitted task
struct Reply {
    response: ServiceResponse,
    status: TaskStatus,
    data: Vec<u8>,
    sense: Option<Vec<u8>>,
    realized: Option<usize>,
}

/// Transport replaying scripted completions, records all CDBs
///
/// Tasks submitted after the script ran out complete with GOOD status
/// and a full transfer.
pub struct ScriptedTransport {
    auto_sense: bool,
    replies: VecDeque<Reply>,
    commands: Vec<Vec<u8>>,
    written: Vec<Vec<u8>>,
    last_sense: Option<Vec<u8>>,
    last_realized: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            auto_sense: true,
            replies: VecDeque::new(),
            commands: Vec::new(),
            written: Vec::new(),
            last_sense: None,
            last_realized: 0,
        }
    }

    /// Sense data has to be fetched with REQUEST SENSE
    pub fn without_auto_sense(mut self) -> Self {
        self.auto_sense = false;
        self
    }

    fn push(&mut self, status: TaskStatus, data: &[u8], sense: Option<Vec<u8>>, realized: Option<usize>) {
        self.replies.push_back(Reply {
            response: ServiceResponse::TaskComplete,
            status,
            data: data.to_vec(),
            sense,
            realized,
        });
    }

    pub fn good(&mut self) {
        self.push(TaskStatus::Good, &[], None, None);
    }

    /// GOOD status returning `data`
    pub fn data(&mut self, data: &[u8]) {
        self.push(TaskStatus::Good, data, None, Some(data.len()));
    }

    pub fn check(&mut self, sense: Vec<u8>) {
        self.push(TaskStatus::CheckCondition, &[], Some(sense), Some(0));
    }

    /// CHECK CONDITION after moving `data`
    pub fn check_after(&mut self, data: &[u8], sense: Vec<u8>) {
        self.push(TaskStatus::CheckCondition, data, Some(sense), Some(data.len()));
    }

    pub fn status(&mut self, status: TaskStatus) {
        self.push(status, &[], None, Some(0));
    }

    pub fn delivery_failure(&mut self) {
        self.replies.push_back(Reply {
            response: ServiceResponse::DeliveryOrTargetFailure,
            status: TaskStatus::Good,
            data: Vec::new(),
            sense: None,
            realized: Some(0),
        });
    }

    /// Submitted CDBs
    pub fn commands(&self) -> &[Vec<u8>] {
        &self.commands
    }

    pub fn opcodes(&self) -> Vec<u8> {
        self.commands.iter().map(|cdb| cdb[0]).collect()
    }

    /// Data sent to the device
    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.written.clear();
    }
}

impl Transport for ScriptedTransport {
    fn submit(&mut self, task: &mut ScsiTask<'_>) -> (ServiceResponse, TaskStatus) {
        self.commands.push(task.cdb().as_bytes().to_vec());

        let transfer_len = task.cdb().transfer_len();

        let reply = self.replies.pop_front().unwrap_or(Reply {
            response: ServiceResponse::TaskComplete,
            status: TaskStatus::Good,
            data: Vec::new(),
            sense: None,
            realized: None,
        });

        match task.buffer_mut() {
            DataBuffer::ToDevice(data) => self.written.push(data[..transfer_len].to_vec()),
            DataBuffer::FromDevice(out) => {
                let len = reply.data.len().min(out.len());
                out[..len].copy_from_slice(&reply.data[..len]);
            }
            DataBuffer::None => (),
        }

        self.last_sense = reply.sense;
        self.last_realized = reply.realized.unwrap_or(transfer_len);

        (reply.response, reply.status)
    }

    fn auto_sense(&self, _task: &ScsiTask<'_>) -> Option<Vec<u8>> {
        if self.auto_sense {
            self.last_sense.clone()
        } else {
            None
        }
    }

    fn realized_transfer_count(&self, _task: &ScsiTask<'_>) -> usize {
        self.last_realized
    }
}

/// Current fixed format sense data
pub fn fixed_sense(key: u8, asc: u8, ascq: u8, flags: u8) -> Vec<u8> {
    let mut sense = vec![0u8; 18];
    sense[0] = 0x70;
    sense[2] = flags | key;
    sense[7] = 10;
    sense[12] = asc;
    sense[13] = ascq;
    sense
}

/// MODE SENSE(6) response with one block descriptor
pub fn mode_sense_data(density: u8, block_length: u32, write_protect: bool) -> Vec<u8> {
    let len = block_length.to_be_bytes();
    let wp = if write_protect { 0x80 } else { 0x00 };
    vec![
        11, 0, wp | 0x10, 8, // header, buffered mode
        density, 0, 0, 0, 0, len[1], len[2], len[3],
    ]
}
