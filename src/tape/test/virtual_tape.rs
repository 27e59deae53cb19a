// End to end tests against the virtual SSC drive
//
// # cargo test tape::test::virtual_tape

use std::path::PathBuf;

use anyhow::Error;
use nix::errno::Errno;

use ssc_api_types::{MtIoctl, MtIoctlReply, MtOp, MtOpRequest, SenseFlags, VirtualTapeDrive};

use crate::tape::virtual_tape::{load_drive_config, open_virtual_tape_drive, VirtualSscTarget};
use crate::tape::{DeviceId, TapeRegistry};

fn create_testdir(name: &str) -> Result<PathBuf, Error> {
    let mut testdir: PathBuf = String::from("./target/testout").into();
    testdir.push(std::module_path!());
    testdir.push(name);

    let _ = std::fs::remove_dir_all(&testdir);
    let _ = std::fs::create_dir_all(&testdir);

    Ok(testdir)
}

fn drive_config() -> VirtualTapeDrive {
    VirtualTapeDrive::new("vtape0", "/nonexistent")
}

fn attach(config: VirtualTapeDrive) -> (TapeRegistry<VirtualSscTarget>, DeviceId) {
    let mut registry = TapeRegistry::new();
    let id = registry.attach(VirtualSscTarget::new(config));
    (registry, id)
}

fn tape_op(
    registry: &mut TapeRegistry<VirtualSscTarget>,
    id: DeviceId,
    op: MtOp,
    count: i32,
) -> Result<(), Errno> {
    registry.ioctl(id, MtIoctl::Op(MtOpRequest::new(op, count)))?;
    Ok(())
}

fn position(registry: &TapeRegistry<VirtualSscTarget>, id: DeviceId) -> (i32, i32) {
    let pos = registry.device(id).unwrap().state().position();
    (pos.fileno(), pos.blkno())
}

fn layout(registry: &TapeRegistry<VirtualSscTarget>, id: DeviceId) -> Vec<Option<usize>> {
    registry.device(id).unwrap().transport().medium_layout()
}

fn sense_flags(registry: &TapeRegistry<VirtualSscTarget>, id: DeviceId) -> SenseFlags {
    registry.device(id).unwrap().state().sense_flags()
}

#[test]
fn test_write_and_read_back() -> Result<(), Error> {
    let (mut registry, id) = attach(drive_config());

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;

    for len in [100, 200, 300] {
        assert_eq!(registry.write(id, &vec![len as u8; len])?, len);
    }
    assert_eq!(position(&registry, id), (0, 3));
    registry.close(id)?;

    // pseudo EOD, positioned between the two filemarks
    assert_eq!(
        layout(&registry, id),
        [Some(100), Some(200), Some(300), None, None]
    );
    assert_eq!(registry.device(id).unwrap().transport().record_position(), 4);
    assert_eq!(position(&registry, id), (1, 0));

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;

    let mut buffer = vec![0u8; 1024];
    for len in [100, 200, 300] {
        assert_eq!(registry.read(id, &mut buffer)?, len);
        assert!(buffer[..len].iter().all(|b| *b == len as u8));
    }
    assert_eq!(position(&registry, id), (0, 3));

    // filemarks read as zero length
    assert_eq!(registry.read(id, &mut buffer)?, 0);
    assert_eq!(position(&registry, id), (1, 0));
    assert_eq!(sense_flags(&registry, id), SenseFlags::FILEMARK);

    assert_eq!(registry.read(id, &mut buffer)?, 0);
    assert_eq!(position(&registry, id), (2, 0));

    assert_eq!(registry.read(id, &mut buffer).unwrap_err(), Errno::EIO);
    assert_eq!(sense_flags(&registry, id), SenseFlags::EOD);
    assert_eq!(position(&registry, id), (2, 0));

    registry.close(id)?;

    Ok(())
}

#[test]
fn test_append_after_close() -> Result<(), Error> {
    let (mut registry, id) = attach(drive_config());

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    registry.write(id, &[1u8; 10])?;
    registry.close(id)?;

    registry.open(id)?;
    registry.write(id, &[2u8; 20])?;
    registry.close(id)?;

    assert_eq!(
        layout(&registry, id),
        [Some(10), None, Some(20), None, None]
    );
    assert_eq!(position(&registry, id), (2, 0));

    Ok(())
}

#[test]
fn test_fixed_block_mode() -> Result<(), Error> {
    let mut config = drive_config();
    config.block_max = Some(65536);
    let (mut registry, id) = attach(config);

    registry.open(id)?;

    assert_eq!(
        tape_op(&mut registry, id, MtOp::SetBlockSize, 0x20000).unwrap_err(),
        Errno::EINVAL
    );
    tape_op(&mut registry, id, MtOp::SetBlockSize, 512)?;
    assert_eq!(registry.device(id).unwrap().state().blksize(), 512);

    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    assert_eq!(registry.write(id, &[7u8; 2048])?, 2048);
    assert_eq!(position(&registry, id), (0, 4));
    assert_eq!(registry.write(id, &[7u8; 1000]).unwrap_err(), Errno::EINVAL);
    registry.close(id)?;

    assert_eq!(
        layout(&registry, id),
        [Some(512), Some(512), Some(512), Some(512), None, None]
    );

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;

    let mut buffer = vec![0u8; 2048];
    assert_eq!(registry.read(id, &mut buffer[..1024])?, 1024);
    assert_eq!(position(&registry, id), (0, 2));

    // only two blocks left before the filemark
    assert_eq!(registry.read(id, &mut buffer)?, 1024);
    assert_eq!(position(&registry, id), (1, 0));

    // back to variable block mode
    tape_op(&mut registry, id, MtOp::SetBlockSize, 0)?;
    assert_eq!(registry.device(id).unwrap().state().blksize(), 0);
    registry.close(id)?;

    Ok(())
}

#[test]
fn test_space_and_position() -> Result<(), Error> {
    let (mut registry, id) = attach(drive_config());

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    registry.write(id, b"A")?;
    registry.write(id, b"B")?;
    tape_op(&mut registry, id, MtOp::WriteEof, 1)?;
    registry.write(id, b"C")?;
    tape_op(&mut registry, id, MtOp::WriteEof, 1)?;
    registry.write(id, b"D")?;
    registry.close(id)?;

    assert_eq!(position(&registry, id), (3, 0));

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    assert_eq!(
        registry.ioctl(id, MtIoctl::ReadLogicalPosition)?,
        MtIoctlReply::Position(0)
    );

    tape_op(&mut registry, id, MtOp::ForwardSpaceFile, 2)?;
    assert_eq!(position(&registry, id), (2, 0));
    assert_eq!(
        registry.ioctl(id, MtIoctl::ReadHardwarePosition)?,
        MtIoctlReply::Position(5)
    );

    let mut buffer = [0u8; 16];
    assert_eq!(registry.read(id, &mut buffer)?, 1);
    assert_eq!(&buffer[..1], b"D");

    // stops in front of the filemark
    tape_op(&mut registry, id, MtOp::BackwardSpaceFile, 1)?;
    assert_eq!(position(&registry, id), (1, 0));

    // record spacing runs into the filemark and stops behind it
    assert_eq!(
        tape_op(&mut registry, id, MtOp::ForwardSpaceRecord, 1).unwrap_err(),
        Errno::EIO
    );
    assert_eq!(position(&registry, id), (2, 0));
    assert_eq!(registry.device(id).unwrap().transport().record_position(), 5);

    let long = registry.device_mut(id).unwrap().read_position_long()?;
    assert_eq!({ long.logical_object_number }, 5);
    assert_eq!({ long.logical_file_id }, 2);

    tape_op(&mut registry, id, MtOp::EndOfData, 1)?;
    assert_eq!(position(&registry, id), (-1, -1));
    assert_eq!(registry.device(id).unwrap().transport().record_position(), 8);

    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    assert_eq!(
        tape_op(&mut registry, id, MtOp::BackwardSpaceRecord, 1).unwrap_err(),
        Errno::EIO
    );
    assert_eq!(sense_flags(&registry, id), SenseFlags::BOM);
    assert_eq!(position(&registry, id), (0, 0));

    registry.close(id)?;

    Ok(())
}

#[test]
fn test_incorrect_length_read() -> Result<(), Error> {
    let (mut registry, id) = attach(drive_config());

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    for _ in 0..3 {
        registry.write(id, &[5u8; 200])?;
    }
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    assert_eq!(position(&registry, id), (0, 0));

    // the drive moves past the block even if it does not fit
    let mut buffer = vec![0u8; 1024];
    assert_eq!(registry.read(id, &mut buffer[..100]).unwrap_err(), Errno::EIO);
    assert_eq!(registry.device(id).unwrap().transport().record_position(), 1);
    assert_eq!(position(&registry, id), (-1, -1));

    assert_eq!(registry.read(id, &mut buffer)?, 200);
    tape_op(&mut registry, id, MtOp::BackwardSpaceRecord, 2)?;
    assert_eq!(registry.device(id).unwrap().transport().record_position(), 0);
    assert_eq!(position(&registry, id), (-1, -1));

    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    assert_eq!(position(&registry, id), (0, 0));

    Ok(())
}

#[test]
fn test_write_protected_medium() -> Result<(), Error> {
    let mut config = drive_config();
    config.write_protect = Some(true);
    let (mut registry, id) = attach(config);

    assert!(registry.device(id).unwrap().state().is_read_only());

    registry.open(id)?;
    assert_eq!(registry.write(id, &[0u8; 64]).unwrap_err(), Errno::EACCES);
    assert_eq!(
        tape_op(&mut registry, id, MtOp::WriteEof, 1).unwrap_err(),
        Errno::EIO
    );
    registry.close(id)?;

    assert!(layout(&registry, id).is_empty());

    Ok(())
}

#[test]
fn test_request_sense_without_auto_sense() -> Result<(), Error> {
    let mut config = drive_config();
    config.auto_sense = Some(false);
    let (mut registry, id) = attach(config);

    registry.open(id)?;

    let mut buffer = [0u8; 64];
    assert_eq!(registry.read(id, &mut buffer).unwrap_err(), Errno::EIO);
    assert_eq!(sense_flags(&registry, id), SenseFlags::EOD);

    registry.write(id, &[3u8; 8])?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    tape_op(&mut registry, id, MtOp::ForwardSpaceRecord, 1)?;
    assert_eq!(registry.read(id, &mut buffer).unwrap_err(), Errno::EIO);
    assert_eq!(sense_flags(&registry, id), SenseFlags::EOD);

    Ok(())
}

#[test]
fn test_end_of_medium() -> Result<(), Error> {
    let mut config = drive_config();
    config.max_size = Some(1000);
    let (mut registry, id) = attach(config);

    registry.open(id)?;
    assert_eq!(registry.write(id, &[0u8; 600])?, 600);
    assert_eq!(registry.write(id, &[0u8; 600]).unwrap_err(), Errno::ENOSPC);
    assert_eq!(layout(&registry, id), [Some(600)]);

    Ok(())
}

#[test]
fn test_unloaded_medium() -> Result<(), Error> {
    let (mut registry, id) = attach(drive_config());

    registry.open(id)?;
    registry.write(id, &[9u8; 32])?;
    tape_op(&mut registry, id, MtOp::Offline, 1)?;
    assert_eq!(position(&registry, id), (-1, -1));

    let mut buffer = [0u8; 64];
    assert_eq!(registry.read(id, &mut buffer).unwrap_err(), Errno::EIO);
    // medium not present is not classified
    assert_eq!(sense_flags(&registry, id), SenseFlags::empty());
    let sense = *registry.device(id).unwrap().state().last_sense().unwrap();
    assert_eq!((sense.asc, sense.ascq), (0x3a, 0x00));

    tape_op(&mut registry, id, MtOp::Load, 1)?;
    assert_eq!(position(&registry, id), (0, 0));
    assert_eq!(registry.read(id, &mut buffer)?, 32);

    Ok(())
}

#[test]
fn test_persistent_drive() -> Result<(), Error> {
    let testdir = create_testdir("test_persistent_drive")?;

    let config = load_drive_config(&testdir)?;
    assert_eq!(config.name, "vtape");
    assert!(config.auto_sense());

    let mut registry = TapeRegistry::new();

    let id = registry.attach(open_virtual_tape_drive(&config)?);
    registry.open(id)?;
    registry.write(id, b"persistent data")?;
    registry.close(id)?;
    let target = registry.detach(id)?;
    assert_eq!(target.medium_layout(), [Some(15), None, None]);
    drop(target);

    let id = registry.attach(open_virtual_tape_drive(&config)?);
    {
        let target = registry.device(id).unwrap().transport();
        assert_eq!(target.medium_layout(), [Some(15), None, None]);
        assert_eq!(target.record_position(), 2);
    }

    registry.open(id)?;
    tape_op(&mut registry, id, MtOp::Rewind, 1)?;
    let mut buffer = [0u8; 64];
    assert_eq!(registry.read(id, &mut buffer)?, 15);
    assert_eq!(&buffer[..15], b"persistent data");
    registry.close(id)?;

    Ok(())
}
