//! SCSI Stream Commands (SSC) to POSIX tape driver core
//!
//! The [tape] module translates tape operator requests (open, close,
//! read, write and `mtio` style ioctls) into SSC commands and keeps
//! track of the tape position.

pub mod tape;
