//! Tape position state machine
//!
//! File and block numbers are tracked independently. A counter is
//! known if it is not negative, [POSITION_UNKNOWN] marks it as unknown.
//! [TapePosition::apply] is the only way to change them.

/// Marker for unknown file/block numbers
pub const POSITION_UNKNOWN: i32 = -1;

/// Completed operations which move the medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEvent {
    Rewind,
    Load,
    Unload,
    SpaceFilemarks(i32),
    SpaceBlocks(i32),
    SpaceEndOfData,
    /// position lost (i.e. spacing over sequential filemarks)
    Invalidate,
    WriteFilemarks(u32),
    /// data transfer, `blksize == 0` means variable block mode
    Transfer { bytes: usize, blksize: u32 },
    /// read or write stopped at a filemark
    Filemark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapePosition {
    fileno: i32,
    blkno: i32,
}

impl Default for TapePosition {
    fn default() -> Self {
        Self::unknown()
    }
}

impl TapePosition {
    pub const fn unknown() -> Self {
        Self {
            fileno: POSITION_UNKNOWN,
            blkno: POSITION_UNKNOWN,
        }
    }

    pub fn fileno(&self) -> i32 {
        self.fileno
    }

    pub fn blkno(&self) -> i32 {
        self.blkno
    }

    pub fn is_known(&self) -> bool {
        self.fileno >= 0 && self.blkno >= 0
    }

    fn set(&mut self, fileno: i32, blkno: i32) {
        self.fileno = fileno;
        self.blkno = blkno;
    }

    fn add_files(&mut self, count: i32) {
        if self.fileno >= 0 {
            self.fileno = self.fileno.saturating_add(count);
            if self.fileno < 0 {
                // moved before BOT, we lost track
                self.set(POSITION_UNKNOWN, POSITION_UNKNOWN);
                return;
            }
        }
        if self.blkno >= 0 {
            self.blkno = 0;
        }
    }

    fn add_blocks(&mut self, count: i32) {
        if self.blkno >= 0 {
            self.blkno = self.blkno.saturating_add(count);
            if self.blkno < 0 {
                self.set(POSITION_UNKNOWN, POSITION_UNKNOWN);
            }
        }
    }

    pub fn apply(&mut self, event: PositionEvent) {
        match event {
            PositionEvent::Rewind | PositionEvent::Load => self.set(0, 0),
            PositionEvent::Unload | PositionEvent::SpaceEndOfData | PositionEvent::Invalidate => {
                self.set(POSITION_UNKNOWN, POSITION_UNKNOWN)
            }
            PositionEvent::SpaceFilemarks(count) => self.add_files(count),
            PositionEvent::SpaceBlocks(count) => self.add_blocks(count),
            PositionEvent::WriteFilemarks(count) => {
                self.add_files(i32::try_from(count).unwrap_or(i32::MAX))
            }
            PositionEvent::Transfer { bytes, blksize } => {
                let blocks = if blksize == 0 {
                    1
                } else {
                    (bytes / blksize as usize) as i32
                };
                self.add_blocks(blocks);
            }
            PositionEvent::Filemark => self.add_files(1),
        }
    }
}
