use ssc_api_types::{MtGet, SenseFlags, TapeStateFlags};
use ssc_scsi::pages::ModeSense6Data;
use ssc_scsi::SenseData;

use super::position::{PositionEvent, TapePosition};

/// Per device state, lives from attach to detach
#[derive(Debug, Default)]
pub struct TapeState {
    blksize: u32,
    density: u8,
    blkmin: u32,
    blkmax: u32,
    position: TapePosition,
    flags: TapeStateFlags,
    sense_flags: SenseFlags,
    last_sense: Option<SenseData>,
    mode: Option<ModeSense6Data>,
}

impl TapeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block size, 0 means variable block mode
    pub fn blksize(&self) -> u32 {
        self.blksize
    }

    pub fn density(&self) -> u8 {
        self.density
    }

    /// Device reported (min, max) block size, 0 if not reported
    pub fn block_limits(&self) -> (u32, u32) {
        (self.blkmin, self.blkmax)
    }

    pub fn position(&self) -> TapePosition {
        self.position
    }

    pub fn flags(&self) -> TapeStateFlags {
        self.flags
    }

    pub fn sense_flags(&self) -> SenseFlags {
        self.sense_flags
    }

    pub fn last_sense(&self) -> Option<&SenseData> {
        self.last_sense.as_ref()
    }

    pub fn mode(&self) -> Option<&ModeSense6Data> {
        self.mode.as_ref()
    }

    pub fn is_fixed_block_size(&self) -> bool {
        self.blksize != 0
    }

    pub fn is_open(&self) -> bool {
        self.flags.contains(TapeStateFlags::OPEN)
    }

    pub fn is_written(&self) -> bool {
        self.flags.contains(TapeStateFlags::WRITTEN)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(TapeStateFlags::READ_ONLY)
    }

    pub(crate) fn apply(&mut self, event: PositionEvent) {
        log::trace!("position event {:?}", event);
        self.position.apply(event);
    }

    /// Take over block size, density and medium flags from MODE SENSE
    pub(crate) fn update_mode(&mut self, mode: ModeSense6Data) {
        self.blksize = mode.block_length();
        self.density = mode.density_code();
        self.flags
            .set(TapeStateFlags::READ_ONLY, mode.header.write_protect());
        self.flags
            .set(TapeStateFlags::BUFFERED, mode.header.buffer_mode() != 0);
        self.mode = Some(mode);
    }

    pub(crate) fn set_block_limits(&mut self, blkmin: u32, blkmax: u32) {
        self.blkmin = blkmin;
        self.blkmax = blkmax;
    }

    pub(crate) fn clear_sense(&mut self) {
        self.sense_flags = SenseFlags::empty();
        self.last_sense = None;
    }

    pub(crate) fn set_sense(&mut self, flags: SenseFlags, sense: Option<SenseData>) {
        self.clear_sense();
        self.sense_flags = flags;
        self.last_sense = sense;
    }

    pub(crate) fn set_open(&mut self, open: bool) {
        self.flags.set(TapeStateFlags::OPEN, open);
    }

    /// The next dispatch sets WRITTEN on success
    pub(crate) fn mark_write_pending(&mut self) {
        self.flags.insert(TapeStateFlags::WRITE_PENDING);
    }

    pub(crate) fn take_write_pending(&mut self) -> bool {
        let pending = self.flags.contains(TapeStateFlags::WRITE_PENDING);
        self.flags.remove(TapeStateFlags::WRITE_PENDING);
        pending
    }

    pub(crate) fn set_written(&mut self, written: bool) {
        self.flags.set(TapeStateFlags::WRITTEN, written);
    }

    pub fn status(&self) -> MtGet {
        MtGet {
            blksize: self.blksize,
            density: self.density,
            blkmin: self.blkmin,
            blkmax: self.blkmax,
            fileno: self.position.fileno(),
            blkno: self.position.blkno(),
            flags: self.flags.bits(),
            sense_flags: self.sense_flags.bits(),
        }
    }
}
