use std::fmt;

use crate::error::VmError;
use crate::memory::Memory;

/// Identifies a device. The upper 16 bits hold the manufacturer id, the
/// lower 16 the serial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub fn new(manufacturer: i64, serial: i64) -> DeviceId {
        DeviceId((((manufacturer & 0xffff) as u32) << 16) | (serial & 0xffff) as u32)
    }

    pub fn manufacturer(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn serial(self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.manufacturer(), self.serial())
    }
}

/// Handle a device uses to enqueue asynchronous interrupt messages for the
/// CPU. Cloneable into device worker threads; sending never blocks, and a
/// full queue drops the message.
#[derive(Debug, Clone)]
pub struct IntSender {
    tx: crossbeam_channel::Sender<u16>,
}

impl IntSender {
    pub(crate) fn new(tx: crossbeam_channel::Sender<u16>) -> IntSender {
        IntSender { tx }
    }

    pub fn send(&self, message: u16) {
        let _ = self.tx.try_send(message);
    }
}

/// A peripheral device. It interacts with a running program through
/// interrupts: synchronously when the program executes `INT`, and
/// asynchronously by enqueueing messages through the [`IntSender`].
///
/// Devices may run worker threads of their own, but must only touch system
/// memory from inside [`Device::interrupt`], which the CPU calls on its own
/// thread. Workers must be stopped before `shutdown` returns.
pub trait Device: Send {
    /// Yields the manufacturer id and serial number of the device.
    fn id(&self) -> DeviceId;

    /// Initializes internal resources. The sender may be stored and used to
    /// enqueue interrupt messages later.
    fn startup(&mut self, int: IntSender) -> Result<(), VmError>;

    /// Cleans up internal resources.
    fn shutdown(&mut self) -> Result<(), VmError>;

    /// Triggers an interrupt on the device, called through a program's
    /// `INT` instruction. The device may inspect and mutate memory.
    fn interrupt(&mut self, memory: &mut Memory);
}

/// The set of connected peripherals, in insertion order. `HWA` reports the
/// insertion index of a device.
#[derive(Default)]
pub struct DeviceMap {
    devices: Vec<Box<dyn Device>>,
}

impl DeviceMap {
    /// Adds a device. Returns false if a device with the same id is already
    /// connected.
    pub fn connect(&mut self, device: Box<dyn Device>) -> bool {
        if self.find(device.id()).is_some() {
            return false;
        }
        self.devices.push(device);
        true
    }

    /// Returns the insertion index of the device with the given id.
    pub fn find(&self, id: DeviceId) -> Option<usize> {
        self.devices.iter().position(|dev| dev.id() == id)
    }

    /// Triggers an interrupt on the device with the given index. Returns
    /// false if the index is not valid.
    pub fn int(&mut self, index: i64, memory: &mut Memory) -> bool {
        let Ok(index) = usize::try_from(index) else {
            return false;
        };
        match self.devices.get_mut(index) {
            Some(dev) => {
                dev.interrupt(memory);
                true
            }
            None => false,
        }
    }

    /// Brings up every connected device, in insertion order. Failures are
    /// collected so every device gets its chance to start.
    pub fn startup(&mut self, int: &IntSender) -> Result<(), VmError> {
        let mut failures = Vec::new();
        for dev in &mut self.devices {
            let id = dev.id();
            tracing::debug!(device = %id, "startup");
            if let Err(err) = dev.startup(int.clone()) {
                failures.push((id, err));
            }
        }
        collect_failures(failures)
    }

    /// Shuts down every connected device, in insertion order.
    pub fn shutdown(&mut self) -> Result<(), VmError> {
        let mut failures = Vec::new();
        for dev in &mut self.devices {
            let id = dev.id();
            tracing::debug!(device = %id, "shutdown");
            if let Err(err) = dev.shutdown() {
                failures.push((id, err));
            }
        }
        collect_failures(failures)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn collect_failures(failures: Vec<(DeviceId, VmError)>) -> Result<(), VmError> {
    if failures.is_empty() {
        return Ok(());
    }

    let message = failures
        .iter()
        .map(|(_, err)| err.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(VmError::Device {
        id: failures[0].0.to_string(),
        message,
    })
}
