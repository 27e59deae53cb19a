//! Operator interface: open/close/read/write/ioctl on a tape device

use ssc_api_types::{MtIoctl, MtIoctlReply, MtOp, MtOpRequest};
use ssc_scsi::cdb::SpaceCode;
use ssc_scsi::Transport;

use super::{TapeDevice, TapeError};

impl<T: Transport> TapeDevice<T> {
    /// Open the device, only one opener is allowed
    pub fn open(&mut self) -> Result<(), TapeError> {
        if self.state.is_open() {
            return Err(TapeError::Busy);
        }
        self.state.set_written(false);
        self.state.set_open(true);
        Ok(())
    }

    /// Close the device
    ///
    /// If data was written since open, two filemarks are written and
    /// the tape is positioned between them. The device is closed even
    /// if this fails.
    pub fn close(&mut self) -> Result<(), TapeError> {
        if !self.state.is_open() {
            return Err(TapeError::NotOpen);
        }

        let result = if self.state.is_written() {
            self.write_pseudo_eod()
        } else {
            Ok(())
        };

        self.state.set_written(false);
        self.state.set_open(false);

        result
    }

    fn write_pseudo_eod(&mut self) -> Result<(), TapeError> {
        self.write_filemarks(2)?;
        self.space(SpaceCode::Filemarks, -1)
    }

    fn check_open(&self) -> Result<(), TapeError> {
        if !self.state.is_open() {
            return Err(TapeError::NotOpen);
        }
        Ok(())
    }

    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, TapeError> {
        self.check_open()?;
        self.read_data(buffer)
    }

    pub fn write(&mut self, buffer: &[u8]) -> Result<usize, TapeError> {
        self.check_open()?;
        self.write_data(buffer)
    }

    pub fn ioctl(&mut self, request: MtIoctl) -> Result<MtIoctlReply, TapeError> {
        self.check_open()?;

        match request {
            MtIoctl::Op(op) => {
                self.tape_op(op)?;
                Ok(MtIoctlReply::Done)
            }
            MtIoctl::GetStatus => Ok(MtIoctlReply::Status(self.state.status())),
            MtIoctl::ReadLogicalPosition => self.block_address(false).map(MtIoctlReply::Position),
            MtIoctl::ReadHardwarePosition => self.block_address(true).map(MtIoctlReply::Position),
        }
    }

    fn block_address(&mut self, hardware: bool) -> Result<u32, TapeError> {
        let page = self.read_block_position(hardware)?;
        if page.position_unknown() {
            return Err(TapeError::PositionUnknown);
        }
        Ok(page.first_block_location)
    }

    fn tape_op(&mut self, request: MtOpRequest) -> Result<(), TapeError> {
        let count = request.count;

        log::debug!("tape operation {:?} count {}", request.op, count);

        // negative counts end up as out of range CDB fields
        match request.op {
            MtOp::Rewind => self.rewind(),
            MtOp::ForwardSpaceFile => self.space(SpaceCode::Filemarks, count),
            MtOp::BackwardSpaceFile => self.space(SpaceCode::Filemarks, count.wrapping_neg()),
            MtOp::ForwardSpaceRecord => self.space(SpaceCode::Blocks, count),
            MtOp::BackwardSpaceRecord => self.space(SpaceCode::Blocks, count.wrapping_neg()),
            MtOp::EndOfData => self.space(SpaceCode::EndOfData, 0),
            MtOp::WriteEof => self.write_filemarks(count as u32),
            MtOp::Offline => self.load_unload(false),
            MtOp::Load => self.load_unload(true),
            MtOp::Erase => self.erase(count != 0),
            MtOp::SetBlockSize => self.set_block_size(count as u32),
            MtOp::Nop => Ok(()),
            op => Err(TapeError::NotSupported(format!("{:?}", op))),
        }
    }
}
