//! SCSI Stream Commands (SSC) building blocks
//!
//! - [cdb]: command descriptor block construction and validation
//! - [pages]: mode sense, block limits and position response decoding
//! - [sense]: fixed format sense data parsing and classification
//! - [task]: the transport collaborator interface
//!
//! Nothing in here talks to a device directly. Commands are submitted
//! through a [Transport] implementation.

pub mod cdb;
pub use cdb::{Cdb, CdbError, ReadPositionAction, SpaceCode, SscOpcode};

pub mod pages;

pub mod sense;
pub use sense::{SenseData, SenseKey};

mod task;
pub use task::*;
