//! SSC command layer of a single tape device

use std::time::Duration;

use ssc_api_types::SenseFlags;
use ssc_scsi::cdb::{
    scsi_cmd_erase, scsi_cmd_load_unload, scsi_cmd_mode_select6, scsi_cmd_mode_sense6,
    scsi_cmd_read6, scsi_cmd_read_block_limits, scsi_cmd_read_position, scsi_cmd_rewind,
    scsi_cmd_space6, scsi_cmd_test_unit_ready, scsi_cmd_write6, scsi_cmd_write_filemarks6,
    Cdb, CdbError, ReadPositionAction, SpaceCode, MASK_3BYTE, READ_BLOCK_LIMITS_LEN,
};
use ssc_scsi::pages::{
    BlockLimits, ModeSense6Data, ReadPositionLongPage, ReadPositionShortPage,
    MODE_SENSE6_ALLOC_LEN,
};
use ssc_scsi::{DataBuffer, ScsiTask, Transport, SSC_MOTION_TIMEOUT, SSC_QUERY_TIMEOUT};

use super::{CommandDispatcher, PositionEvent, TapeError, TapeState};

const READ_POSITION_SHORT_LEN: usize = 20;
const READ_POSITION_LONG_LEN: usize = 32;

/// Device lifecycle callbacks
///
/// Called by the [TapeRegistry](super::TapeRegistry) when a device
/// appears, is started, stopped or goes away.
pub trait DeviceLifecycle {
    /// Reset all state, position is unknown afterwards
    fn attach(&mut self);
    /// Start of day, query mode parameters and block limits
    fn start(&mut self) -> Result<(), TapeError>;
    fn stop(&mut self);
    fn detach(&mut self);
}

/// A tape device: command dispatcher plus device state
pub struct TapeDevice<T> {
    dispatcher: CommandDispatcher<T>,
    pub(crate) state: TapeState,
}

impl<T: Transport> TapeDevice<T> {
    pub fn new(transport: T) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(transport),
            state: TapeState::new(),
        }
    }

    pub fn state(&self) -> &TapeState {
        &self.state
    }

    pub fn transport(&self) -> &T {
        self.dispatcher.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.dispatcher.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.dispatcher.into_transport()
    }

    fn execute(
        &mut self,
        cdb: Cdb,
        buffer: DataBuffer<'_>,
        timeout: Duration,
    ) -> Result<usize, TapeError> {
        let mut task = ScsiTask::new(cdb, buffer, timeout);
        self.dispatcher.execute(&mut self.state, &mut task)
    }

    pub fn test_unit_ready(&mut self) -> Result<(), TapeError> {
        let cdb = scsi_cmd_test_unit_ready();
        self.execute(cdb, DataBuffer::None, SSC_QUERY_TIMEOUT)?;
        Ok(())
    }

    pub fn rewind(&mut self) -> Result<(), TapeError> {
        let cdb = scsi_cmd_rewind(0)?;
        self.execute(cdb, DataBuffer::None, SSC_MOTION_TIMEOUT)?;
        self.state.apply(PositionEvent::Rewind);
        Ok(())
    }

    /// Space `count` objects, negative counts move towards the beginning
    pub fn space(&mut self, code: SpaceCode, count: i32) -> Result<(), TapeError> {
        let cdb = scsi_cmd_space6(code, count)?;

        if let Err(err) = self.execute(cdb, DataBuffer::None, SSC_MOTION_TIMEOUT) {
            self.state.apply(space_failed_event(code, count, &err));
            return Err(err);
        }

        let event = match code {
            SpaceCode::Blocks => PositionEvent::SpaceBlocks(count),
            SpaceCode::Filemarks => PositionEvent::SpaceFilemarks(count),
            SpaceCode::SequentialFilemarks => PositionEvent::Invalidate,
            SpaceCode::EndOfData => PositionEvent::SpaceEndOfData,
        };
        self.state.apply(event);

        Ok(())
    }

    /// Write filemarks, a count of 0 flushes the drive buffer
    pub fn write_filemarks(&mut self, count: u32) -> Result<(), TapeError> {
        let cdb = scsi_cmd_write_filemarks6(0, 0, count)?;

        if let Err(err) = self.execute(cdb, DataBuffer::None, SSC_MOTION_TIMEOUT) {
            self.state.apply(PositionEvent::Invalidate);
            return Err(err);
        }
        self.state.apply(PositionEvent::WriteFilemarks(count));

        Ok(())
    }

    pub fn load_unload(&mut self, load: bool) -> Result<(), TapeError> {
        let cdb = scsi_cmd_load_unload(0, 0, 0, 0, load as u8)?;
        self.execute(cdb, DataBuffer::None, SSC_MOTION_TIMEOUT)?;

        if load {
            self.state.apply(PositionEvent::Load);
        } else {
            self.state.apply(PositionEvent::Unload);
        }
        Ok(())
    }

    /// Erase from the current position, `long` erases up to the end of
    /// the medium
    pub fn erase(&mut self, long: bool) -> Result<(), TapeError> {
        let cdb = scsi_cmd_erase(long as u8, 0)?;
        self.execute(cdb, DataBuffer::None, SSC_MOTION_TIMEOUT)?;
        Ok(())
    }

    pub fn read_block_limits(&mut self) -> Result<BlockLimits, TapeError> {
        let mut data = [0u8; READ_BLOCK_LIMITS_LEN];

        let cdb = scsi_cmd_read_block_limits(&DataBuffer::FromDevice(&mut data))?;
        let len = self.execute(cdb, DataBuffer::FromDevice(&mut data), SSC_QUERY_TIMEOUT)?;

        let limits = BlockLimits::decode(&data[..len.min(data.len())])
            .map_err(TapeError::InvalidResponse)?;

        self.state
            .set_block_limits(limits.min_block_length(), limits.max_block_length());

        Ok(limits)
    }

    /// MODE SENSE(6) without mode pages, updates block size, density
    /// and write protection
    pub fn mode_sense(&mut self) -> Result<ModeSense6Data, TapeError> {
        let mut data = [0u8; MODE_SENSE6_ALLOC_LEN];

        let cdb = scsi_cmd_mode_sense6(
            0,
            0,
            0,
            0,
            MODE_SENSE6_ALLOC_LEN as u32,
            &DataBuffer::FromDevice(&mut data),
        )?;
        let len = self.execute(cdb, DataBuffer::FromDevice(&mut data), SSC_QUERY_TIMEOUT)?;

        let mode = ModeSense6Data::decode(&data[..len.min(data.len())])
            .map_err(TapeError::InvalidResponse)?;

        self.state.update_mode(mode);

        Ok(mode)
    }

    pub fn mode_select(&mut self, mode: &ModeSense6Data) -> Result<(), TapeError> {
        let data = mode
            .to_parameter_list()
            .map_err(TapeError::InvalidResponse)?;

        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let cdb = scsi_cmd_mode_select6(1, 0, len, &DataBuffer::ToDevice(&data))?;
        self.execute(cdb, DataBuffer::ToDevice(&data), SSC_QUERY_TIMEOUT)?;

        Ok(())
    }

    /// Set the block size, 0 selects variable block mode
    pub fn set_block_size(&mut self, size: u32) -> Result<(), TapeError> {
        if size > MASK_3BYTE {
            return Err(CdbError::FieldOverflow {
                field: "BLOCK_LENGTH",
                value: size,
                mask: MASK_3BYTE,
            }
            .into());
        }

        let (min, max) = self.state.block_limits();

        if size != 0 && (min != 0 || max != 0) && (size < min || size > max) {
            return Err(TapeError::OutOfRange { size, min, max });
        }

        let mut mode = match self.state.mode() {
            Some(mode) => *mode,
            None => self.mode_sense()?,
        };
        mode.set_block_length(size)?;

        self.mode_select(&mode)?;
        // re-read, the device may have adjusted the parameters
        self.mode_sense()?;

        Ok(())
    }

    /// Query the block address, `hardware` selects the vendor specific
    /// address instead of the logical one
    pub fn read_block_position(
        &mut self,
        hardware: bool,
    ) -> Result<ReadPositionShortPage, TapeError> {
        let action = if hardware {
            ReadPositionAction::ShortVendorSpecific
        } else {
            ReadPositionAction::ShortBlockId
        };

        let mut data = [0u8; READ_POSITION_SHORT_LEN];
        let cdb = scsi_cmd_read_position(action.code(), 0, &DataBuffer::FromDevice(&mut data))?;
        let len = self.execute(cdb, DataBuffer::FromDevice(&mut data), SSC_QUERY_TIMEOUT)?;

        ReadPositionShortPage::decode(&data[..len.min(data.len())])
            .map_err(TapeError::InvalidResponse)
    }

    pub fn read_position_long(&mut self) -> Result<ReadPositionLongPage, TapeError> {
        let mut data = [0u8; READ_POSITION_LONG_LEN];
        let cdb = scsi_cmd_read_position(
            ReadPositionAction::LongForm.code(),
            0,
            &DataBuffer::FromDevice(&mut data),
        )?;
        let len = self.execute(cdb, DataBuffer::FromDevice(&mut data), SSC_QUERY_TIMEOUT)?;

        ReadPositionLongPage::decode(&data[..len.min(data.len())])
            .map_err(TapeError::InvalidResponse)
    }

    /// Returns (fixed, transfer length) for a buffer of `len` bytes
    fn transfer_length(&self, len: usize) -> Result<(bool, u32), TapeError> {
        let blksize = self.state.blksize();

        if blksize == 0 {
            return Ok((false, u32::try_from(len).unwrap_or(u32::MAX)));
        }

        if len % blksize as usize != 0 {
            return Err(TapeError::NotAligned { len, blksize });
        }

        let blocks = len / blksize as usize;
        Ok((true, u32::try_from(blocks).unwrap_or(u32::MAX)))
    }

    /// READ(6) into `buffer`, returns the number of bytes read
    ///
    /// Hitting a filemark is not an error, the bytes read before the
    /// filemark are returned (0 when reading right at the filemark).
    pub fn read_data(&mut self, buffer: &mut [u8]) -> Result<usize, TapeError> {
        if buffer.is_empty() {
            return Ok(0);
        }

        let (fixed, transfer_length) = self.transfer_length(buffer.len())?;
        let blksize = self.state.blksize();

        // variable mode accepts short blocks
        let sili = if fixed { 0 } else { 1 };

        let cdb = scsi_cmd_read6(
            sili,
            fixed as u8,
            transfer_length,
            blksize,
            &DataBuffer::FromDevice(&mut *buffer),
        )?;

        match self.execute(cdb, DataBuffer::FromDevice(buffer), SSC_MOTION_TIMEOUT) {
            Ok(count) => {
                self.state.apply(PositionEvent::Transfer {
                    bytes: count,
                    blksize,
                });
                Ok(count)
            }
            Err(TapeError::CheckCondition {
                flags, transferred, ..
            }) if flags.contains(SenseFlags::FILEMARK) => {
                self.state.apply(PositionEvent::Filemark);
                Ok(transferred)
            }
            Err(err) => {
                if let Some(event) = read_failed_event(&err, blksize) {
                    self.state.apply(event);
                }
                Err(err)
            }
        }
    }

    /// WRITE(6) from `buffer`, returns the number of bytes written
    pub fn write_data(&mut self, buffer: &[u8]) -> Result<usize, TapeError> {
        if self.state.is_read_only() {
            return Err(TapeError::WriteProtected);
        }

        if buffer.is_empty() {
            return Ok(0);
        }

        let (fixed, transfer_length) = self.transfer_length(buffer.len())?;
        let blksize = self.state.blksize();

        let cdb = scsi_cmd_write6(
            fixed as u8,
            transfer_length,
            blksize,
            &DataBuffer::ToDevice(buffer),
        )?;

        self.state.mark_write_pending();

        match self.execute(cdb, DataBuffer::ToDevice(buffer), SSC_MOTION_TIMEOUT) {
            Ok(count) => {
                self.state.apply(PositionEvent::Transfer {
                    bytes: count,
                    blksize,
                });
                Ok(count)
            }
            Err(err) => {
                if err.has_sense_flags(SenseFlags::FILEMARK) {
                    self.state.apply(PositionEvent::Filemark);
                } else {
                    // the medium may have moved by an unknown amount
                    self.state.apply(PositionEvent::Invalidate);
                }
                Err(err)
            }
        }
    }
}

/// Where a failed READ(6) left the medium, `None` if it did not move
///
/// Only end of data stops a read at a known place. Any other exception
/// (incorrect length, medium error, ...) leaves the position unknown.
fn read_failed_event(err: &TapeError, blksize: u32) -> Option<PositionEvent> {
    match err {
        TapeError::CheckCondition {
            flags, transferred, ..
        } if flags.contains(SenseFlags::EOD) => {
            if blksize == 0 || *transferred == 0 {
                None
            } else {
                Some(PositionEvent::Transfer {
                    bytes: *transferred,
                    blksize,
                })
            }
        }
        _ => Some(PositionEvent::Invalidate),
    }
}

/// Where a failed SPACE left the medium
fn space_failed_event(code: SpaceCode, count: i32, err: &TapeError) -> PositionEvent {
    if err.has_sense_flags(SenseFlags::BOM) {
        return PositionEvent::Rewind;
    }
    if code == SpaceCode::Blocks && count > 0 && err.has_sense_flags(SenseFlags::FILEMARK) {
        // stopped right after the filemark
        return PositionEvent::Filemark;
    }
    PositionEvent::Invalidate
}

impl<T: Transport> DeviceLifecycle for TapeDevice<T> {
    fn attach(&mut self) {
        self.state = TapeState::new();
    }

    fn start(&mut self) -> Result<(), TapeError> {
        let mode = self.mode_sense().map(drop);
        let limits = self.read_block_limits().map(drop);
        mode.and(limits)
    }

    fn stop(&mut self) {
        log::debug!("stop tape device");
    }

    fn detach(&mut self) {
        self.state = TapeState::new();
    }
}
