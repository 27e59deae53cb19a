use serde::{Deserialize, Serialize};

use proxmox_schema::{api, IntegerSchema, Schema, StringSchema};

pub const DRIVE_NAME_SCHEMA: Schema = StringSchema::new("Drive Identifier.")
    .min_length(3)
    .max_length(32)
    .schema();

pub const VIRTUAL_DRIVE_PATH_SCHEMA: Schema =
    StringSchema::new("Directory holding the virtual drive state (i.e. '/var/tmp/vtape0')")
        .schema();

pub const BLOCK_LENGTH_SCHEMA: Schema =
    IntegerSchema::new("Block length in bytes (0 means variable block mode).")
        .minimum(0)
        .maximum(0xff_ffff)
        .schema();

/// Default virtual tape capacity
pub const VIRTUAL_TAPE_DEFAULT_SIZE: usize = 64 * 1024 * 1024;

/// Default block limits reported by the virtual drive
pub const VIRTUAL_TAPE_DEFAULT_BLOCK_MIN: u32 = 1;
pub const VIRTUAL_TAPE_DEFAULT_BLOCK_MAX: u32 = 0x10_0000;

#[api(
    properties: {
        name: {
            schema: DRIVE_NAME_SCHEMA,
        },
        path: {
            schema: VIRTUAL_DRIVE_PATH_SCHEMA,
        },
        "block-min": {
            schema: BLOCK_LENGTH_SCHEMA,
            optional: true,
        },
        "block-max": {
            schema: BLOCK_LENGTH_SCHEMA,
            optional: true,
        },
    }
)]
#[derive(Debug, Clone, Serialize, Deserialize)]
/// Emulated SSC tape drive (only for test and debug)
#[serde(rename_all = "kebab-case")]
pub struct VirtualTapeDrive {
    pub name: String,
    pub path: String,
    /// Virtual tape capacity in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_min: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_max: Option<u32>,
    /// Deliver sense data with the failed command (default). If
    /// disabled, the host needs to issue REQUEST SENSE.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_sense: Option<bool>,
    /// Emulate a write protected medium
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_protect: Option<bool>,
}

impl VirtualTapeDrive {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            max_size: None,
            block_min: None,
            block_max: None,
            auto_sense: None,
            write_protect: None,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size.unwrap_or(VIRTUAL_TAPE_DEFAULT_SIZE)
    }

    pub fn block_limits(&self) -> (u32, u32) {
        (
            self.block_min.unwrap_or(VIRTUAL_TAPE_DEFAULT_BLOCK_MIN),
            self.block_max.unwrap_or(VIRTUAL_TAPE_DEFAULT_BLOCK_MAX),
        )
    }

    pub fn auto_sense(&self) -> bool {
        self.auto_sense.unwrap_or(true)
    }

    pub fn write_protect(&self) -> bool {
        self.write_protect.unwrap_or(false)
    }
}
