/// Control the virtual SSC tape drive
///
/// Drives the tape layer like an `mt` command line tool, on top of the
/// emulated SSC drive stored in a directory.
///
/// Features:
///
/// - standard `mt` style tape operations
/// - optional json output format
/// - read/write tape files
use std::collections::HashMap;
use std::io::{Read, Write};

use anyhow::{bail, format_err, Error};
use serde_json::Value;

use proxmox_router::cli::*;
use proxmox_schema::{api, IntegerSchema, Schema};

use ssc_api_types::{
    MtGet, MtIoctl, MtIoctlReply, MtOp, MtOpRequest, BLOCK_LENGTH_SCHEMA,
    VIRTUAL_DRIVE_PATH_SCHEMA,
};
use ssc_tape::tape::virtual_tape::{load_drive_config, open_virtual_tape_drive, VirtualSscTarget};
use ssc_tape::tape::{DeviceId, TapeRegistry};

pub const FILE_MARK_COUNT_SCHEMA: Schema = IntegerSchema::new("File mark count.")
    .minimum(1)
    .maximum(0x7f_ffff)
    .schema();

pub const RECORD_COUNT_SCHEMA: Schema = IntegerSchema::new("Record count.")
    .minimum(1)
    .maximum(0x7f_ffff)
    .schema();

pub const RECORD_SIZE_SCHEMA: Schema = IntegerSchema::new("Record size in bytes.")
    .minimum(1)
    .maximum(0xff_ffff)
    .default(64 * 1024)
    .schema();

/// Attached and opened virtual drive
struct TapeHandle {
    registry: TapeRegistry<VirtualSscTarget>,
    id: DeviceId,
}

impl TapeHandle {
    fn tape_op(&mut self, op: MtOp, count: i32) -> Result<(), Error> {
        self.registry
            .ioctl(self.id, MtIoctl::Op(MtOpRequest::new(op, count)))
            .map_err(|err| format_err!("{:?} failed - {}", op, err))?;
        Ok(())
    }

    fn status(&mut self) -> Result<MtGet, Error> {
        match self.registry.ioctl(self.id, MtIoctl::GetStatus)? {
            MtIoctlReply::Status(status) => Ok(status),
            other => bail!("got unexpected reply {:?}", other),
        }
    }

    fn block_position(&mut self, hardware: bool) -> Result<u32, Error> {
        let request = if hardware {
            MtIoctl::ReadHardwarePosition
        } else {
            MtIoctl::ReadLogicalPosition
        };

        match self.registry.ioctl(self.id, request)? {
            MtIoctlReply::Position(pos) => Ok(pos),
            other => bail!("got unexpected reply {:?}", other),
        }
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        Ok(self.registry.read(self.id, buffer)?)
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize, Error> {
        Ok(self.registry.write(self.id, buffer)?)
    }

    /// Close and detach, writes the pseudo EOD after writing
    fn close(mut self) -> Result<(), Error> {
        let result = self.registry.close(self.id);
        self.registry.detach(self.id)?;
        result.map_err(|err| format_err!("close failed - {}", err))
    }
}

fn get_tape_handle(param: &Value) -> Result<TapeHandle, Error> {
    let path = match param["path"].as_str() {
        Some(path) => path.to_string(),
        None => match std::env::var("SSC_TAPE") {
            Ok(path) => path,
            Err(_) => bail!("no drive path specified (use --path or SSC_TAPE)"),
        },
    };

    log::info!("using virtual drive {}", path);

    let config = load_drive_config(path.as_ref())?;
    let target = open_virtual_tape_drive(&config)?;

    let mut registry = TapeRegistry::new();
    let id = registry.attach(target);
    registry
        .open(id)
        .map_err(|err| format_err!("open failed - {}", err))?;

    Ok(TapeHandle { registry, id })
}

/// Run a single tape operation and close the drive
fn run_tape_op(param: &Value, op: MtOp, count: i32) -> Result<(), Error> {
    let mut handle = get_tape_handle(param)?;
    let result = handle.tape_op(op, count);
    let close = handle.close();
    result.and(close)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Rewind the tape
fn rewind(param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::Rewind, 1)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_COUNT_SCHEMA,
            },
        },
    },
)]
/// Forward space count files (position after file mark).
fn fsf(count: i32, param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::ForwardSpaceFile, count)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_COUNT_SCHEMA,
            },
        },
    },
)]
/// Backward space count files (position before file mark).
fn bsf(count: i32, param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::BackwardSpaceFile, count)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: RECORD_COUNT_SCHEMA,
            },
        },
    },
)]
/// Forward space records.
fn fsr(count: i32, param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::ForwardSpaceRecord, count)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: RECORD_COUNT_SCHEMA,
            },
        },
    },
)]
/// Backward space records.
fn bsr(count: i32, param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::BackwardSpaceRecord, count)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Move to end of media
fn eod(param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::EndOfData, 1)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            count: {
                schema: FILE_MARK_COUNT_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Write count (default 1) EOF marks at current position.
fn weof(count: Option<i32>, param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::WriteEof, count.unwrap_or(1))
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            long: {
                description: "Erase up to the end of the medium.",
                type: bool,
                optional: true,
                default: true,
            },
        },
    },
)]
/// Erase media (from current position)
fn erase(long: Option<bool>, param: Value) -> Result<(), Error> {
    let count = if long.unwrap_or(true) { 1 } else { 0 };
    run_tape_op(&param, MtOp::Erase, count)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Load media
fn load(param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::Load, 1)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Eject media
fn eject(param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::Offline, 1)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            size: {
                schema: BLOCK_LENGTH_SCHEMA,
            },
        },
    },
)]
/// Set the block size (0 selects variable block mode)
fn setblk(size: i32, param: Value) -> Result<(), Error> {
    run_tape_op(&param, MtOp::SetBlockSize, size)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            "output-format": {
                schema: OUTPUT_FORMAT,
                optional: true,
            },
        },
    },
)]
/// Drive Status
fn status(param: Value) -> Result<(), Error> {
    let output_format = get_output_format(&param);

    let mut handle = get_tape_handle(&param)?;
    let result = handle.status();
    handle.close()?;

    if output_format == "json-pretty" {
        let result = result.map_err(|err: Error| err.to_string());
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    if output_format == "json" {
        let result = result.map_err(|err: Error| err.to_string());
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    if output_format != "text" {
        bail!("unknown output format '{}'", output_format);
    }

    let status = result?;

    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            hardware: {
                description: "Report the hardware (vendor specific) block address.",
                type: bool,
                optional: true,
                default: false,
            },
        },
    },
)]
/// Report the current block address
fn position(hardware: Option<bool>, param: Value) -> Result<(), Error> {
    let mut handle = get_tape_handle(&param)?;
    let result = handle.block_position(hardware.unwrap_or(false));
    handle.close()?;

    println!("{}", result?);

    Ok(())
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            file: {
                description: "Input file (default is stdin).",
                type: String,
                optional: true,
            },
            "record-size": {
                schema: RECORD_SIZE_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Write data as a new tape file at the current position
fn write(file: Option<String>, record_size: Option<usize>, param: Value) -> Result<(), Error> {
    let mut reader: Box<dyn Read> = match file {
        Some(path) => Box::new(std::fs::File::open(&path)?),
        None => Box::new(std::io::stdin()),
    };

    let mut buffer = vec![0u8; record_size.unwrap_or(64 * 1024)];

    let mut handle = get_tape_handle(&param)?;

    let result: Result<(), Error> = proxmox_lang::try_block!({
        let mut total = 0;
        loop {
            let len = fill_buffer(&mut reader, &mut buffer)?;
            if len == 0 {
                break;
            }
            total += handle.write(&buffer[..len])?;
        }
        log::info!("wrote {} bytes", total);
        Ok(())
    });

    let close = handle.close();
    result.and(close)
}

/// Read until the buffer is full or EOF is reached
fn fill_buffer(reader: &mut dyn Read, buffer: &mut [u8]) -> Result<usize, Error> {
    let mut done = 0;
    while done < buffer.len() {
        let len = reader.read(&mut buffer[done..])?;
        if len == 0 {
            break;
        }
        done += len;
    }
    Ok(done)
}

#[api(
    input: {
        properties: {
            path: {
                schema: VIRTUAL_DRIVE_PATH_SCHEMA,
                optional: true,
            },
            file: {
                description: "Output file (default is stdout).",
                type: String,
                optional: true,
            },
            "record-size": {
                schema: RECORD_SIZE_SCHEMA,
                optional: true,
            },
        },
    },
)]
/// Read the tape file at the current position (up to the next file mark)
fn read(file: Option<String>, record_size: Option<usize>, param: Value) -> Result<(), Error> {
    let mut writer: Box<dyn Write> = match file {
        Some(path) => Box::new(std::fs::File::create(&path)?),
        None => Box::new(std::io::stdout()),
    };

    let mut buffer = vec![0u8; record_size.unwrap_or(64 * 1024)];

    let mut handle = get_tape_handle(&param)?;

    let result: Result<(), Error> = proxmox_lang::try_block!({
        let mut total = 0;
        loop {
            let len = handle.read(&mut buffer)?;
            if len == 0 {
                break; // file mark
            }
            writer.write_all(&buffer[..len])?;
            total += len;
        }
        writer.flush()?;
        log::info!("read {} bytes", total);
        Ok(())
    });

    let close = handle.close();
    result.and(close)
}

fn complete_drive_path(_arg: &str, _param: &HashMap<String, String>) -> Vec<String> {
    match std::env::var("SSC_TAPE") {
        Ok(path) => vec![path],
        Err(_) => Vec::new(),
    }
}

fn main() -> Result<(), Error> {
    init_cli_logger("SSC_LOG", "info");

    let std_cmd = |method| CliCommand::new(method).completion_cb("path", complete_drive_path);

    let cmd_def = CliCommandMap::new()
        .usage_skip_options(&["path", "output-format"])
        .insert("bsf", std_cmd(&API_METHOD_BSF).arg_param(&["count"]))
        .insert("bsr", std_cmd(&API_METHOD_BSR).arg_param(&["count"]))
        .insert("eject", std_cmd(&API_METHOD_EJECT))
        .insert("eod", std_cmd(&API_METHOD_EOD))
        .insert("erase", std_cmd(&API_METHOD_ERASE))
        .insert("fsf", std_cmd(&API_METHOD_FSF).arg_param(&["count"]))
        .insert("fsr", std_cmd(&API_METHOD_FSR).arg_param(&["count"]))
        .insert("load", std_cmd(&API_METHOD_LOAD))
        .insert("position", std_cmd(&API_METHOD_POSITION))
        .insert("read", std_cmd(&API_METHOD_READ).arg_param(&["file"]))
        .insert("rewind", std_cmd(&API_METHOD_REWIND))
        .insert("setblk", std_cmd(&API_METHOD_SETBLK).arg_param(&["size"]))
        .insert("status", std_cmd(&API_METHOD_STATUS))
        .insert("weof", std_cmd(&API_METHOD_WEOF).arg_param(&["count"]))
        .insert("write", std_cmd(&API_METHOD_WRITE).arg_param(&["file"]));

    run_cli_command(cmd_def, CliEnvironment::new(), None);

    Ok(())
}
