// Device registry tests
//
// # cargo test tape::test::registry

use anyhow::Error;
use nix::errno::Errno;

use ssc_api_types::{MtIoctl, MtIoctlReply};

use super::{mode_sense_data, ScriptedTransport};
use crate::tape::TapeRegistry;

fn transport() -> ScriptedTransport {
    let mut transport = ScriptedTransport::new();
    transport.data(&mode_sense_data(0x42, 0, false));
    transport.data(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x01]);
    transport
}

#[test]
fn test_attach_runs_start_of_day() -> Result<(), Error> {
    let mut registry = TapeRegistry::new();

    let id = registry.attach(transport());
    assert_eq!(id, 0);

    let device = registry.device(id).unwrap();
    assert_eq!(device.transport().opcodes(), [0x1a, 0x05]);
    assert_eq!(device.state().block_limits(), (1, 65536));
    assert_eq!(device.state().position().fileno(), -1);

    registry.open(id)?;
    match registry.ioctl(id, MtIoctl::GetStatus)? {
        MtIoctlReply::Status(status) => {
            assert_eq!(status.blkmax, 65536);
            assert_eq!(status.density, 0x42);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    Ok(())
}

#[test]
fn test_attach_survives_failing_start_of_day() {
    let mut registry = TapeRegistry::new();

    let mut transport = ScriptedTransport::new();
    transport.delivery_failure();
    transport.delivery_failure();

    let id = registry.attach(transport);
    assert!(registry.device(id).is_some());
    assert!(registry.open(id).is_ok());
}

#[test]
fn test_slot_reuse_and_growth() -> Result<(), Error> {
    let mut registry = TapeRegistry::new();

    let ids: Vec<_> = (0..9).map(|_| registry.attach(transport())).collect();
    assert_eq!(ids, (0..9).collect::<Vec<_>>());
    assert_eq!(registry.capacity(), 16);

    registry.detach(3)?;
    assert!(registry.device(3).is_none());
    assert_eq!(registry.detach(3).unwrap_err(), Errno::ENXIO);

    assert_eq!(registry.attach(transport()), 3);
    assert_eq!(registry.attach(transport()), 9);
    assert_eq!(registry.capacity(), 16);

    Ok(())
}

#[test]
fn test_detach_open_device() -> Result<(), Error> {
    let mut registry = TapeRegistry::new();
    let id = registry.attach(transport());

    registry.open(id)?;
    assert_eq!(registry.detach(id).unwrap_err(), Errno::EBUSY);

    registry.close(id)?;
    let transport = registry.detach(id)?;
    assert_eq!(transport.opcodes(), [0x1a, 0x05]);

    assert_eq!(registry.open(id).unwrap_err(), Errno::ENXIO);

    Ok(())
}

#[test]
fn test_errno_mapping() -> Result<(), Error> {
    let mut registry = TapeRegistry::new();
    let id = registry.attach(transport());

    assert_eq!(registry.ioctl(42, MtIoctl::GetStatus).unwrap_err(), Errno::ENXIO);
    assert_eq!(registry.close(id).unwrap_err(), Errno::EBADF);

    registry.open(id)?;
    assert_eq!(registry.open(id).unwrap_err(), Errno::EBUSY);

    let mut buffer = [0u8; 128];
    assert_eq!(registry.read(id, &mut buffer)?, 128);
    assert_eq!(registry.write(id, &buffer)?, 128);

    registry.close(id)?;

    Ok(())
}
