//! Device table, maps device numbers to attached tape devices

use nix::errno::Errno;

use ssc_api_types::{MtIoctl, MtIoctlReply};
use ssc_scsi::Transport;

use super::{DeviceLifecycle, TapeDevice, TapeError};

/// The table grows in chunks of this many slots
const SLOT_CHUNK: usize = 8;

/// Device number, stable from attach to detach
pub type DeviceId = usize;

/// All attached tape devices
///
/// Entry points return plain [Errno] values, errors are logged here.
/// Device numbers of detached devices get reused.
pub struct TapeRegistry<T> {
    slots: Vec<Option<TapeDevice<T>>>,
    free: Vec<DeviceId>,
}

impl<T: Transport> Default for TapeRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> TapeRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn grow(&mut self) {
        let start = self.slots.len();
        let end = start + SLOT_CHUNK;
        self.slots.resize_with(end, || None);
        // lowest numbers first
        self.free.extend((start..end).rev());
    }

    /// Number of slots, attached or not
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attach a new device and run start of day
    ///
    /// A failing start of day is logged only, the device stays usable
    /// (i.e. no medium loaded yet).
    pub fn attach(&mut self, transport: T) -> DeviceId {
        let id = loop {
            if let Some(id) = self.free.pop() {
                break id;
            }
            self.grow();
        };

        let mut device = TapeDevice::new(transport);
        device.attach();

        if let Err(err) = device.start() {
            log::warn!("tape device {id}: start of day failed - {err}");
        }

        self.slots[id] = Some(device);
        log::info!("tape device {id} attached");

        id
    }

    /// Detach a device, returns its transport
    pub fn detach(&mut self, id: DeviceId) -> Result<T, Errno> {
        let slot = self.slots.get_mut(id).ok_or(Errno::ENXIO)?;

        match slot {
            None => return Err(Errno::ENXIO),
            Some(device) if device.state().is_open() => {
                log::error!("tape device {id}: detach failed - {}", TapeError::Busy);
                return Err(Errno::EBUSY);
            }
            Some(_) => (),
        }

        let mut device = slot.take().ok_or(Errno::ENXIO)?;
        device.stop();
        device.detach();

        self.free.push(id);
        log::info!("tape device {id} detached");

        Ok(device.into_transport())
    }

    pub fn device(&self, id: DeviceId) -> Option<&TapeDevice<T>> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut TapeDevice<T>> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    fn call<R>(
        &mut self,
        id: DeviceId,
        what: &str,
        func: impl FnOnce(&mut TapeDevice<T>) -> Result<R, TapeError>,
    ) -> Result<R, Errno> {
        let device = self
            .device_mut(id)
            .ok_or_else(|| TapeError::NoDevice.errno())?;

        func(device).map_err(|err| {
            log::error!("tape device {id}: {what} failed - {err}");
            err.errno()
        })
    }

    pub fn open(&mut self, id: DeviceId) -> Result<(), Errno> {
        self.call(id, "open", |device| device.open())
    }

    pub fn close(&mut self, id: DeviceId) -> Result<(), Errno> {
        self.call(id, "close", |device| device.close())
    }

    pub fn read(&mut self, id: DeviceId, buffer: &mut [u8]) -> Result<usize, Errno> {
        self.call(id, "read", |device| device.read(buffer))
    }

    pub fn write(&mut self, id: DeviceId, buffer: &[u8]) -> Result<usize, Errno> {
        self.call(id, "write", |device| device.write(buffer))
    }

    pub fn ioctl(&mut self, id: DeviceId, request: MtIoctl) -> Result<MtIoctlReply, Errno> {
        self.call(id, "ioctl", |device| device.ioctl(request))
    }
}
