// Operator interface tests (open/close/read/write/ioctl)
//
// # cargo test tape::test::operator

use nix::errno::Errno;

use ssc_api_types::{MtIoctl, MtIoctlReply, MtOp, MtOpRequest, TapeStateFlags};
use ssc_scsi::pages::{ReadPositionShortPage, POSITION_FLAG_BPU};

use super::{fixed_sense, mode_sense_data, ScriptedTransport};
use crate::tape::{TapeDevice, TapeError};

fn open_device(blksize: u32) -> TapeDevice<ScriptedTransport> {
    let mut device = TapeDevice::new(ScriptedTransport::new());

    device
        .transport_mut()
        .data(&mode_sense_data(0x42, blksize, false));
    device.mode_sense().unwrap();
    device.open().unwrap();

    device.transport_mut().clear();
    device
}

fn tape_op(
    device: &mut TapeDevice<ScriptedTransport>,
    op: MtOp,
    count: i32,
) -> Result<MtIoctlReply, TapeError> {
    device.ioctl(MtIoctl::Op(MtOpRequest::new(op, count)))
}

fn position(device: &TapeDevice<ScriptedTransport>) -> (i32, i32) {
    let pos = device.state().position();
    (pos.fileno(), pos.blkno())
}

#[test]
fn test_single_opener() {
    let mut device = open_device(0);

    let err = device.open().unwrap_err();
    assert!(matches!(err, TapeError::Busy));
    assert_eq!(err.errno(), Errno::EBUSY);

    device.close().unwrap();
    device.open().unwrap();

    // open itself does not talk to the device
    assert!(device.transport().commands().is_empty());
}

#[test]
fn test_requires_open() {
    let mut device = TapeDevice::new(ScriptedTransport::new());

    let err = device.ioctl(MtIoctl::GetStatus).unwrap_err();
    assert_eq!(err.errno(), Errno::EBADF);

    let mut buffer = [0u8; 16];
    assert!(matches!(device.read(&mut buffer), Err(TapeError::NotOpen)));
    assert!(matches!(device.write(&buffer), Err(TapeError::NotOpen)));
    assert!(matches!(device.close(), Err(TapeError::NotOpen)));

    assert!(device.transport().commands().is_empty());
}

#[test]
fn test_close_writes_pseudo_eod() {
    let mut device = open_device(0);

    device.write(&[0x01; 32]).unwrap();
    device.close().unwrap();

    assert_eq!(
        device.transport().commands(),
        [
            vec![0x0a, 0x00, 0x00, 0x00, 32, 0x00],
            vec![0x10, 0x00, 0x00, 0x00, 0x02, 0x00],
            vec![0x11, 0x01, 0xff, 0xff, 0xff, 0x00],
        ]
    );

    let flags = device.state().flags();
    assert!(!flags.contains(TapeStateFlags::WRITTEN));
    assert!(!flags.contains(TapeStateFlags::OPEN));
}

#[test]
fn test_close_clears_flags_on_failure() {
    let mut device = open_device(0);

    device.write(&[0x01; 32]).unwrap();
    assert!(device.state().is_written());

    let transport = device.transport_mut();
    transport.good(); // WRITE FILEMARKS
    transport.check(fixed_sense(0x03, 0x14, 0x00, 0)); // SPACE

    assert!(device.close().is_err());
    assert_eq!(device.transport().opcodes(), [0x0a, 0x10, 0x11]);
    assert!(!device.state().is_written());
    assert!(!device.state().is_open());

    device.open().unwrap();
}

#[test]
fn test_close_without_write() {
    let mut device = open_device(0);

    let mut buffer = [0u8; 64];
    device.read(&mut buffer).unwrap();
    device.close().unwrap();

    assert_eq!(device.transport().opcodes(), [0x08]);
}

#[test]
fn test_space_verbs() {
    let mut device = open_device(0);

    tape_op(&mut device, MtOp::Rewind, 1).unwrap();
    tape_op(&mut device, MtOp::ForwardSpaceFile, 10).unwrap();
    tape_op(&mut device, MtOp::ForwardSpaceRecord, 3).unwrap();
    assert_eq!(position(&device), (10, 3));
    device.transport_mut().clear();

    assert_eq!(
        tape_op(&mut device, MtOp::BackwardSpaceFile, 2).unwrap(),
        MtIoctlReply::Done
    );
    assert_eq!(
        device.transport().commands(),
        [vec![0x11, 0x01, 0xff, 0xff, 0xfe, 0x00]]
    );
    assert_eq!(position(&device), (8, 0));

    tape_op(&mut device, MtOp::ForwardSpaceRecord, 5).unwrap();
    tape_op(&mut device, MtOp::BackwardSpaceRecord, 2).unwrap();
    assert_eq!(position(&device), (8, 3));

    tape_op(&mut device, MtOp::EndOfData, 1).unwrap();
    assert_eq!(position(&device), (-1, -1));

    let commands = device.transport().commands();
    assert_eq!(commands[3], [0x11, 0x03, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn test_motion_verbs() {
    let mut device = open_device(0);

    tape_op(&mut device, MtOp::WriteEof, 2).unwrap();
    tape_op(&mut device, MtOp::Erase, 0).unwrap();
    tape_op(&mut device, MtOp::Erase, 1).unwrap();
    tape_op(&mut device, MtOp::Offline, 1).unwrap();
    assert_eq!(position(&device), (-1, -1));
    tape_op(&mut device, MtOp::Load, 1).unwrap();
    assert_eq!(position(&device), (0, 0));
    tape_op(&mut device, MtOp::Nop, 1).unwrap();

    assert_eq!(
        device.transport().commands(),
        [
            vec![0x10, 0x00, 0x00, 0x00, 0x02, 0x00],
            vec![0x19, 0x00, 0x00, 0x00, 0x00, 0x00],
            vec![0x19, 0x02, 0x00, 0x00, 0x00, 0x00],
            vec![0x1b, 0x00, 0x00, 0x00, 0x00, 0x00],
            vec![0x1b, 0x00, 0x00, 0x00, 0x01, 0x00],
        ]
    );
}

#[test]
fn test_invalid_counts() {
    let mut device = open_device(0);

    let err = tape_op(&mut device, MtOp::WriteEof, -1).unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);

    let err = tape_op(&mut device, MtOp::SetBlockSize, -1).unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);

    let err = tape_op(&mut device, MtOp::ForwardSpaceFile, 0x80_0000).unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);

    assert!(device.transport().commands().is_empty());
}

#[test]
fn test_unsupported_verbs() {
    let mut device = open_device(0);

    for op in [MtOp::Retension, MtOp::SetDensity, MtOp::WriteSetmarks] {
        let err = tape_op(&mut device, op, 1).unwrap_err();
        assert_eq!(err.errno(), Errno::ENOTSUP);
    }
    assert!(device.transport().commands().is_empty());
}

#[test]
fn test_get_status() {
    let mut device = open_device(512);

    tape_op(&mut device, MtOp::Rewind, 1).unwrap();
    device.transport_mut().data(&[0x5a; 1024]);
    let mut buffer = [0u8; 1024];
    device.read(&mut buffer).unwrap();

    let status = match device.ioctl(MtIoctl::GetStatus).unwrap() {
        MtIoctlReply::Status(status) => status,
        other => panic!("unexpected reply {:?}", other),
    };

    assert_eq!(status.blksize, 512);
    assert_eq!(status.density, 0x42);
    assert_eq!((status.fileno, status.blkno), (0, 2));
    assert_eq!(
        status.flags,
        (TapeStateFlags::OPEN | TapeStateFlags::BUFFERED).bits()
    );
    assert_eq!(status.sense_flags, 0);
}

#[test]
fn test_position_queries() {
    let mut device = open_device(0);

    let page = ReadPositionShortPage::new(0, 42).to_bytes().unwrap();
    device.transport_mut().data(&page);

    assert_eq!(
        device.ioctl(MtIoctl::ReadLogicalPosition).unwrap(),
        MtIoctlReply::Position(42)
    );

    let page = ReadPositionShortPage::new(POSITION_FLAG_BPU, 0)
        .to_bytes()
        .unwrap();
    device.transport_mut().data(&page);

    let err = device.ioctl(MtIoctl::ReadHardwarePosition).unwrap_err();
    assert!(matches!(err, TapeError::PositionUnknown));
    assert_eq!(err.errno(), Errno::ENOTSUP);

    assert_eq!(
        device.transport().commands(),
        [
            vec![0x34, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            vec![0x34, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        ]
    );
}

#[test]
fn test_set_block_size_verb() {
    let mut device = open_device(0);

    let transport = device.transport_mut();
    transport.good();
    transport.data(&mode_sense_data(0x42, 4096, false));

    tape_op(&mut device, MtOp::SetBlockSize, 4096).unwrap();
    assert_eq!(device.state().blksize(), 4096);

    // fixed mode: read length must be a multiple of the block size
    let mut buffer = vec![0u8; 1000];
    let err = device.read(&mut buffer).unwrap_err();
    assert_eq!(err.errno(), Errno::EINVAL);
}
