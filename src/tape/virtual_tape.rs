// Note: This is only for test and debug

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use proxmox_sys::fs::{replace_file, CreateOptions};

use ssc_api_types::VirtualTapeDrive;
use ssc_scsi::cdb::{ReadPositionAction, SpaceCode, SscOpcode};
use ssc_scsi::pages::{
    BlockLimits, ModeSense6Data, ReadPositionLongPage, ReadPositionShortPage, POSITION_FLAG_BOP,
};
use ssc_scsi::sense::{SENSE_FLAG_EOM, SENSE_FLAG_FILEMARK, SENSE_FLAG_ILI, SENSE_RESPONSE_CURRENT_FIXED};
use ssc_scsi::{DataBuffer, ScsiTask, SenseKey, ServiceResponse, TaskStatus, Transport};

const DRIVE_CONFIG_NAME: &str = "drive-config.json";
const TAPE_STATE_NAME: &str = "tape-state.json";
const LOCK_NAME: &str = ".drive.lck";

/// Density code reported by the virtual drive
const VIRTUAL_TAPE_DENSITY: u8 = 0x42;

const SENSE_DATA_LEN: usize = 18;

/// Load the drive configuration stored in `path`
///
/// Falls back to a default configuration if there is none.
pub fn load_drive_config(path: &Path) -> Result<VirtualTapeDrive, Error> {
    let mut config_path = path.to_owned();
    config_path.push(DRIVE_CONFIG_NAME);

    let path_str = path
        .to_str()
        .ok_or_else(|| format_err!("non UTF-8 drive path {:?}", path))?;

    let default = serde_json::to_value(VirtualTapeDrive::new("vtape", path_str))?;
    let data = proxmox_sys::fs::file_get_json(config_path, Some(default))?;
    let mut config: VirtualTapeDrive = serde_json::from_value(data)?;

    config.path = path_str.to_string();

    Ok(config)
}

/// Open a persistent virtual drive, this needs to lock the drive
pub fn open_virtual_tape_drive(config: &VirtualTapeDrive) -> Result<VirtualSscTarget, Error> {
    proxmox_lang::try_block!({
        std::fs::create_dir_all(&config.path)?;

        let mut lock_path = PathBuf::from(&config.path);
        lock_path.push(LOCK_NAME);

        let options = CreateOptions::new();
        let timeout = std::time::Duration::new(10, 0);
        let lock = proxmox_sys::fs::open_file_locked(&lock_path, timeout, true, options)?;

        let mut target = VirtualSscTarget::new(config.clone());
        target.state = target.load_state()?;
        target.lock = Some(lock);

        Ok(target)
    })
    .map_err(|err: Error| {
        format_err!(
            "open drive '{}' ({}) failed - {}",
            config.name,
            config.path,
            err
        )
    })
}

mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum TapeRecord {
    Block {
        #[serde(with = "hex_data")]
        data: Vec<u8>,
    },
    Filemark,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct VirtualTapeState {
    loaded: bool,
    /// index into `records`
    pos: usize,
    block_length: u32,
    density: u8,
    buffered: bool,
    records: Vec<TapeRecord>,
}

impl Default for VirtualTapeState {
    fn default() -> Self {
        Self {
            loaded: true,
            pos: 0,
            block_length: 0,
            density: VIRTUAL_TAPE_DENSITY,
            buffered: true,
            records: Vec::new(),
        }
    }
}

/// Result of the last command
struct Completion {
    status: TaskStatus,
    sense: Option<Vec<u8>>,
    realized: usize,
}

impl Completion {
    fn good(realized: usize) -> Self {
        Self {
            status: TaskStatus::Good,
            sense: None,
            realized,
        }
    }

    fn check(sense: Vec<u8>, realized: usize) -> Self {
        Self {
            status: TaskStatus::CheckCondition,
            sense: Some(sense),
            realized,
        }
    }
}

/// Fixed format sense data, `residue` sets the INFORMATION field
fn sense_data(key: SenseKey, asc: u8, ascq: u8, flags: u8, residue: Option<i64>) -> Vec<u8> {
    let mut sense = vec![0u8; SENSE_DATA_LEN];
    sense[0] = SENSE_RESPONSE_CURRENT_FIXED;
    if let Some(residue) = residue {
        sense[0] |= 0x80;
        let info = (residue as i32).to_be_bytes();
        sense[3..7].copy_from_slice(&info);
    }
    sense[2] = flags | key.code();
    sense[7] = (SENSE_DATA_LEN - 8) as u8;
    sense[12] = asc;
    sense[13] = ascq;
    sense
}

fn not_ready() -> Completion {
    // medium not present
    Completion::check(sense_data(SenseKey::NotReady, 0x3a, 0x00, 0, None), 0)
}

fn illegal_request(asc: u8) -> Completion {
    Completion::check(sense_data(SenseKey::IllegalRequest, asc, 0x00, 0, None), 0)
}

fn data_protect() -> Completion {
    Completion::check(sense_data(SenseKey::DataProtect, 0x27, 0x00, 0, None), 0)
}

fn filemark_detected(residue: i64, realized: usize) -> Completion {
    let sense = sense_data(SenseKey::NoSense, 0x00, 0x01, SENSE_FLAG_FILEMARK, Some(residue));
    Completion::check(sense, realized)
}

fn end_of_data(residue: i64, realized: usize) -> Completion {
    let sense = sense_data(SenseKey::BlankCheck, 0x00, 0x05, 0, Some(residue));
    Completion::check(sense, realized)
}

fn beginning_of_medium(residue: i64) -> Completion {
    let sense = sense_data(SenseKey::NoSense, 0x00, 0x04, SENSE_FLAG_EOM, Some(residue));
    Completion::check(sense, 0)
}

fn be24(data: &[u8]) -> u32 {
    u32::from_be_bytes([0, data[0], data[1], data[2]])
}

/// Copy `data` to the host, limited by allocation length and buffer size
fn copy_to_host(buffer: &mut DataBuffer<'_>, allocation_length: usize, data: &[u8]) -> usize {
    match buffer {
        DataBuffer::FromDevice(out) => {
            let len = data.len().min(out.len()).min(allocation_length);
            out[..len].copy_from_slice(&data[..len]);
            len
        }
        _ => 0,
    }
}

/// Emulated SSC tape drive
///
/// The medium is a list of blocks and filemarks. Optionally persisted
/// as JSON in the drive directory after each command changing it.
pub struct VirtualSscTarget {
    config: VirtualTapeDrive,
    state: VirtualTapeState,
    last: Completion,
    /// sense data for REQUEST SENSE (without auto sense)
    pending_sense: Option<Vec<u8>>,
    lock: Option<File>,
}

impl VirtualSscTarget {
    /// Create an in-memory drive with an empty, loaded medium
    pub fn new(config: VirtualTapeDrive) -> Self {
        Self {
            config,
            state: VirtualTapeState::default(),
            last: Completion::good(0),
            pending_sense: None,
            lock: None,
        }
    }

    pub fn config(&self) -> &VirtualTapeDrive {
        &self.config
    }

    fn state_file_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.config.path);
        path.push(TAPE_STATE_NAME);
        path
    }

    fn load_state(&self) -> Result<VirtualTapeState, Error> {
        let path = self.state_file_path();

        let default = serde_json::to_value(VirtualTapeState::default())?;

        let data = proxmox_sys::fs::file_get_json(path, Some(default))?;
        let state: VirtualTapeState = serde_json::from_value(data)?;

        if state.pos > state.records.len() {
            bail!("corrupt tape state - position {} beyond end of data", state.pos);
        }

        Ok(state)
    }

    fn store_state(&self) -> Result<(), Error> {
        let path = self.state_file_path();
        let raw = serde_json::to_string_pretty(&serde_json::to_value(&self.state)?)?;

        let options = CreateOptions::new();
        replace_file(path, raw.as_bytes(), options, false)?;
        Ok(())
    }

    fn used_bytes(&self) -> usize {
        self.state
            .records
            .iter()
            .map(|record| match record {
                TapeRecord::Block { data } => data.len(),
                TapeRecord::Filemark => 0,
            })
            .sum()
    }

    /// Writing discards everything after the current position
    fn truncate(&mut self) {
        let pos = self.state.pos;
        self.state.records.truncate(pos);
    }

    fn filemarks_before(&self, pos: usize) -> usize {
        self.state.records[..pos]
            .iter()
            .filter(|record| **record == TapeRecord::Filemark)
            .count()
    }

    fn execute(&mut self, opcode: SscOpcode, cdb: &[u8], buffer: &mut DataBuffer<'_>) -> Completion {
        match opcode {
            SscOpcode::RequestSense => {
                let sense = self
                    .pending_sense
                    .take()
                    .unwrap_or_else(|| sense_data(SenseKey::NoSense, 0, 0, 0, None));
                Completion::good(copy_to_host(buffer, cdb[4] as usize, &sense))
            }
            SscOpcode::ReadBlockLimits => {
                let (min, max) = self.config.block_limits();
                let min = u16::try_from(min).unwrap_or(u16::MAX);
                match BlockLimits::new(min, max).to_bytes() {
                    Ok(data) => Completion::good(copy_to_host(buffer, data.len(), &data)),
                    Err(_) => illegal_request(0x24),
                }
            }
            SscOpcode::ModeSense6 => {
                let mode = ModeSense6Data::new(
                    self.state.density,
                    self.state.block_length,
                    self.config.write_protect(),
                    self.state.buffered,
                );
                match mode.map_err(Error::from).and_then(|mode| mode.to_bytes()) {
                    Ok(data) => Completion::good(copy_to_host(buffer, cdb[4] as usize, &data)),
                    Err(_) => illegal_request(0x24),
                }
            }
            SscOpcode::ModeSelect6 => self.mode_select(cdb, buffer),
            _ if !self.state.loaded && opcode != SscOpcode::LoadUnload => not_ready(),
            SscOpcode::TestUnitReady => Completion::good(0),
            SscOpcode::Rewind => {
                self.state.pos = 0;
                Completion::good(0)
            }
            SscOpcode::LoadUnload => {
                self.state.loaded = cdb[4] & 1 != 0;
                self.state.pos = 0;
                Completion::good(0)
            }
            SscOpcode::Read6 => self.read(cdb, buffer),
            SscOpcode::Write6 => self.write(cdb, buffer),
            SscOpcode::WriteFilemarks6 => self.write_filemarks(be24(&cdb[2..5])),
            SscOpcode::Space6 => self.space(cdb),
            SscOpcode::Erase => {
                if self.config.write_protect() {
                    return data_protect();
                }
                self.truncate();
                Completion::good(0)
            }
            SscOpcode::ReadPosition => self.read_position(cdb, buffer),
        }
    }

    fn mode_select(&mut self, cdb: &[u8], buffer: &mut DataBuffer<'_>) -> Completion {
        let data = match buffer {
            DataBuffer::ToDevice(data) => &data[..(cdb[4] as usize).min(data.len())],
            _ => return illegal_request(0x24),
        };

        let mode = match ModeSense6Data::decode_parameter_list(data) {
            Ok(mode) => mode,
            Err(_) => return illegal_request(0x26), // invalid field in parameter list
        };

        if mode.block_descriptor.is_some() {
            let length = mode.block_length();
            let (min, max) = self.config.block_limits();
            if length != 0 && (length < min || length > max) {
                return illegal_request(0x26);
            }
            self.state.block_length = length;
            if mode.density_code() != 0 {
                self.state.density = mode.density_code();
            }
        }
        self.state.buffered = mode.header.buffer_mode() != 0;

        Completion::good(0)
    }

    fn read(&mut self, cdb: &[u8], buffer: &mut DataBuffer<'_>) -> Completion {
        let fixed = cdb[1] & 1 != 0;
        let sili = cdb[1] & 2 != 0;
        let transfer_length = be24(&cdb[2..5]) as usize;

        let out = match buffer {
            DataBuffer::FromDevice(out) => out,
            _ => return illegal_request(0x24),
        };

        if !fixed {
            if out.len() < transfer_length {
                return illegal_request(0x24);
            }

            let record = self.state.records.get(self.state.pos).cloned();
            return match record {
                None => end_of_data(transfer_length as i64, 0),
                Some(TapeRecord::Filemark) => {
                    self.state.pos += 1;
                    filemark_detected(transfer_length as i64, 0)
                }
                Some(TapeRecord::Block { data }) => {
                    self.state.pos += 1;
                    let len = data.len().min(transfer_length);
                    out[..len].copy_from_slice(&data[..len]);

                    if data.len() == transfer_length || (sili && data.len() < transfer_length) {
                        Completion::good(len)
                    } else {
                        let residue = transfer_length as i64 - data.len() as i64;
                        let sense = sense_data(SenseKey::NoSense, 0, 0, SENSE_FLAG_ILI, Some(residue));
                        Completion::check(sense, len)
                    }
                }
            };
        }

        let block_length = self.state.block_length as usize;
        if sili || block_length == 0 || out.len() < transfer_length * block_length {
            return illegal_request(0x24);
        }

        let mut done = 0;
        for count in 0..transfer_length {
            let residue = (transfer_length - count) as i64;
            let record = self.state.records.get(self.state.pos).cloned();
            match record {
                None => return end_of_data(residue, done),
                Some(TapeRecord::Filemark) => {
                    self.state.pos += 1;
                    return filemark_detected(residue, done);
                }
                Some(TapeRecord::Block { data }) => {
                    self.state.pos += 1;
                    if data.len() != block_length {
                        let len = data.len().min(block_length);
                        out[done..done + len].copy_from_slice(&data[..len]);
                        let sense = sense_data(SenseKey::NoSense, 0, 0, SENSE_FLAG_ILI, Some(residue));
                        return Completion::check(sense, done + len);
                    }
                    out[done..done + block_length].copy_from_slice(&data);
                    done += block_length;
                }
            }
        }

        Completion::good(done)
    }

    fn write(&mut self, cdb: &[u8], buffer: &mut DataBuffer<'_>) -> Completion {
        if self.config.write_protect() {
            return data_protect();
        }

        let fixed = cdb[1] & 1 != 0;
        let transfer_length = be24(&cdb[2..5]) as usize;

        let data = match buffer {
            DataBuffer::ToDevice(data) => *data,
            _ => return illegal_request(0x24),
        };

        let blocks: Vec<Vec<u8>> = if fixed {
            let block_length = self.state.block_length as usize;
            let len = transfer_length * block_length;
            if block_length == 0 || data.len() < len {
                return illegal_request(0x24);
            }
            data[..len].chunks(block_length).map(<[u8]>::to_vec).collect()
        } else {
            if data.len() < transfer_length {
                return illegal_request(0x24);
            }
            vec![data[..transfer_length].to_vec()]
        };

        self.truncate();

        let incoming: usize = blocks.iter().map(Vec::len).sum();
        if self.used_bytes() + incoming > self.config.max_size() {
            let sense = sense_data(SenseKey::VolumeOverflow, 0x00, 0x02, SENSE_FLAG_EOM, None);
            return Completion::check(sense, 0);
        }

        for data in blocks {
            self.state.records.push(TapeRecord::Block { data });
        }
        self.state.pos = self.state.records.len();

        Completion::good(incoming)
    }

    fn write_filemarks(&mut self, count: u32) -> Completion {
        if self.config.write_protect() {
            return data_protect();
        }

        self.truncate();
        for _ in 0..count {
            self.state.records.push(TapeRecord::Filemark);
        }
        self.state.pos = self.state.records.len();

        Completion::good(0)
    }

    fn space(&mut self, cdb: &[u8]) -> Completion {
        // sign extend the 24 bit count
        let count = ((be24(&cdb[2..5]) << 8) as i32) >> 8;

        match SpaceCode::from_code(cdb[1] & 0x0f) {
            Some(SpaceCode::Blocks) => self.space_blocks(count),
            Some(SpaceCode::Filemarks) => self.space_filemarks(count),
            Some(SpaceCode::EndOfData) => {
                self.state.pos = self.state.records.len();
                Completion::good(0)
            }
            _ => illegal_request(0x24),
        }
    }

    fn space_blocks(&mut self, count: i32) -> Completion {
        if count >= 0 {
            for done in 0..count {
                let residue = (count - done) as i64;
                match self.state.records.get(self.state.pos) {
                    None => return end_of_data(residue, 0),
                    Some(TapeRecord::Filemark) => {
                        self.state.pos += 1;
                        return filemark_detected(residue, 0);
                    }
                    Some(TapeRecord::Block { .. }) => self.state.pos += 1,
                }
            }
        } else {
            let count = count.unsigned_abs();
            for done in 0..count {
                let residue = (count - done) as i64;
                if self.state.pos == 0 {
                    return beginning_of_medium(residue);
                }
                self.state.pos -= 1;
                if self.state.records[self.state.pos] == TapeRecord::Filemark {
                    return filemark_detected(residue, 0);
                }
            }
        }
        Completion::good(0)
    }

    fn space_filemarks(&mut self, count: i32) -> Completion {
        if count >= 0 {
            let mut left = count as u32;
            while left > 0 {
                match self.state.records.get(self.state.pos) {
                    None => return end_of_data(left as i64, 0),
                    Some(TapeRecord::Filemark) => left -= 1,
                    Some(TapeRecord::Block { .. }) => (),
                }
                self.state.pos += 1;
            }
        } else {
            // stops on the beginning of medium side of the filemark
            let mut left = count.unsigned_abs();
            while left > 0 {
                if self.state.pos == 0 {
                    return beginning_of_medium(left as i64);
                }
                self.state.pos -= 1;
                if self.state.records[self.state.pos] == TapeRecord::Filemark {
                    left -= 1;
                }
            }
        }
        Completion::good(0)
    }

    fn read_position(&mut self, cdb: &[u8], buffer: &mut DataBuffer<'_>) -> Completion {
        let pos = self.state.pos;
        let flags = if pos == 0 { POSITION_FLAG_BOP } else { 0 };

        let data = match ReadPositionAction::from_code(cdb[1] & 0x1f) {
            ReadPositionAction::ShortBlockId | ReadPositionAction::ShortVendorSpecific => {
                ReadPositionShortPage::new(flags, pos as u32).to_bytes()
            }
            ReadPositionAction::LongForm => {
                let file_id = self.filemarks_before(pos);
                ReadPositionLongPage::new(flags, pos as u64, file_id as u64).to_bytes()
            }
            _ => return illegal_request(0x24),
        };

        match data {
            Ok(data) => Completion::good(copy_to_host(buffer, data.len(), &data)),
            Err(_) => illegal_request(0x24),
        }
    }

    /// Medium contents, one entry per record: block length or `None`
    /// for a filemark
    pub fn medium_layout(&self) -> Vec<Option<usize>> {
        self.state
            .records
            .iter()
            .map(|record| match record {
                TapeRecord::Block { data } => Some(data.len()),
                TapeRecord::Filemark => None,
            })
            .collect()
    }

    /// Record index of the current position
    pub fn record_position(&self) -> usize {
        self.state.pos
    }
}

fn changes_medium(opcode: SscOpcode) -> bool {
    !matches!(
        opcode,
        SscOpcode::TestUnitReady
            | SscOpcode::RequestSense
            | SscOpcode::ReadBlockLimits
            | SscOpcode::ModeSense6
            | SscOpcode::ReadPosition
    )
}

impl Transport for VirtualSscTarget {
    fn submit(&mut self, task: &mut ScsiTask<'_>) -> (ServiceResponse, TaskStatus) {
        let cdb = *task.cdb();

        let opcode = match SscOpcode::from_code(cdb.opcode()) {
            Some(opcode) => opcode,
            None => {
                // invalid command operation code
                let completion = illegal_request(0x20);
                let status = completion.status;
                self.pending_sense = completion.sense.clone();
                self.last = completion;
                return (ServiceResponse::TaskComplete, status);
            }
        };

        let completion = self.execute(opcode, cdb.as_bytes(), task.buffer_mut());

        if self.lock.is_some() && changes_medium(opcode) {
            if let Err(err) = self.store_state() {
                log::error!("virtual drive '{}': store state failed - {}", self.config.name, err);
                self.last = Completion::good(0);
                return (ServiceResponse::DeliveryOrTargetFailure, TaskStatus::Good);
            }
        }

        let status = completion.status;
        if opcode != SscOpcode::RequestSense {
            self.pending_sense = completion.sense.clone();
        }
        self.last = completion;

        (ServiceResponse::TaskComplete, status)
    }

    fn auto_sense(&self, _task: &ScsiTask<'_>) -> Option<Vec<u8>> {
        if !self.config.auto_sense() || self.last.status != TaskStatus::CheckCondition {
            return None;
        }
        self.last.sense.clone()
    }

    fn realized_transfer_count(&self, _task: &ScsiTask<'_>) -> usize {
        self.last.realized
    }
}
