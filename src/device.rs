//! The boundary with MIDI transports: sinks (`Receiver`s), sources (`Transmitter`s) and the
//! devices that bundle them.
//!
//! Concrete transports (USB, Bluetooth, virtual ports) live outside this crate and plug in by
//! implementing these traits and registering a device in a [`DeviceRegistry`].

use crate::{message::Message, prelude::*, stream::MidiStream};

/// The timestamp passed to `Receiver::send` when a message has no timestamp.
pub const NO_TIMESTAMP: i64 = -1;

/// A sink for MIDI messages.
///
/// Any `Fn(&Message, i64)` closure is a receiver.
pub trait Receiver: Send + Sync {
    /// Deliver a message. `timestamp` is in microseconds, or `NO_TIMESTAMP`.
    fn send(&self, message: &Message, timestamp: i64);

    /// Release the sink. Messages sent afterwards may be dropped.
    fn close(&self) {}
}
impl<F> Receiver for F
where
    F: Fn(&Message, i64) + Send + Sync,
{
    fn send(&self, message: &Message, timestamp: i64) {
        self(message, timestamp)
    }
}

/// A source of MIDI messages, forwarding everything it produces to its current receiver.
pub trait Transmitter: Send + Sync {
    /// Replace the receiver, or disconnect with `None`.
    fn set_receiver(&self, receiver: Option<Arc<dyn Receiver>>);

    fn receiver(&self) -> Option<Arc<dyn Receiver>>;

    /// Release the source.
    fn close(&self) {}
}

/// Descriptive information about a device.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct DeviceInfo {
    pub name: String,
    pub vendor: String,
    pub description: String,
    pub version: String,
}
impl DeviceInfo {
    pub fn new(name: impl Into<String>) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            ..DeviceInfo::default()
        }
    }
}

/// A device exposing any amount of sinks and sources.
pub trait MidiDevice: Send + Sync {
    fn info(&self) -> DeviceInfo;

    fn receivers(&self) -> Vec<Arc<dyn Receiver>>;

    fn transmitters(&self) -> Vec<Arc<dyn Transmitter>>;
}

/// Whether two shared handles point to the same object, ignoring vtables.
pub(crate) fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// The set of devices available to an application.
///
/// Owned by the application and handed to every component that needs devices, instead of living
/// in a global.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: Mutex<Vec<Arc<dyn MidiDevice>>>,
}
impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries(lock(&self.devices).iter().map(|dev| dev.info().name))
            .finish()
    }
}
impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    pub fn add_device(&self, device: Arc<dyn MidiDevice>) {
        log::debug!("device added: {}", device.info().name);
        lock(&self.devices).push(device);
    }

    /// Returns whether the device was registered.
    pub fn remove_device(&self, device: &Arc<dyn MidiDevice>) -> bool {
        let mut devices = lock(&self.devices);
        let before = devices.len();
        devices.retain(|dev| !same_object(dev, device));
        let removed = devices.len() != before;
        if removed {
            log::debug!("device removed: {}", device.info().name);
        }
        removed
    }

    /// A snapshot of the registered devices.
    pub fn devices(&self) -> Vec<Arc<dyn MidiDevice>> {
        lock(&self.devices).clone()
    }

    /// Every sink of every registered device.
    pub fn receivers(&self) -> Vec<Arc<dyn Receiver>> {
        self.devices()
            .iter()
            .flat_map(|dev| dev.receivers())
            .collect()
    }

    /// Every source of every registered device.
    pub fn transmitters(&self) -> Vec<Arc<dyn Transmitter>> {
        self.devices()
            .iter()
            .flat_map(|dev| dev.transmitters())
            .collect()
    }

    /// The first available sink.
    pub fn receiver(&self) -> Result<Arc<dyn Receiver>> {
        self.receivers()
            .into_iter()
            .next()
            .ok_or_else(|| err_device!("no device provides a receiver").into())
    }

    /// The first available source.
    pub fn transmitter(&self) -> Result<Arc<dyn Transmitter>> {
        self.transmitters()
            .into_iter()
            .next()
            .ok_or_else(|| err_device!("no device provides a transmitter").into())
    }
}

/// A source fed with raw, undelimited bytes, such as those read from a serial port or a pipe.
///
/// The bytes are framed by a [`MidiStream`](struct.MidiStream.html) and every complete message
/// is forwarded to the receiver.
#[derive(Default)]
pub struct StreamTransmitter {
    stream: Mutex<MidiStream>,
    receiver: Mutex<Option<Arc<dyn Receiver>>>,
}
impl StreamTransmitter {
    pub fn new() -> StreamTransmitter {
        StreamTransmitter::default()
    }

    /// Frame a chunk of raw bytes, forwarding the complete messages with the given timestamp.
    ///
    /// Returns the amount of messages framed. Messages are dropped if there is no receiver.
    pub fn feed(&self, bytes: &[u8], timestamp: i64) -> usize {
        let mut framed = Vec::new();
        lock(&self.stream).feed(bytes, |msg| framed.push(msg));
        let receiver = lock(&self.receiver).clone();
        match receiver {
            Some(receiver) => {
                for msg in framed.iter() {
                    receiver.send(msg, timestamp);
                }
            }
            None if !framed.is_empty() => {
                log::trace!("no receiver, dropping {} framed messages", framed.len())
            }
            None => {}
        }
        framed.len()
    }
}
impl Transmitter for StreamTransmitter {
    fn set_receiver(&self, receiver: Option<Arc<dyn Receiver>>) {
        *lock(&self.receiver) = receiver;
    }

    fn receiver(&self) -> Option<Arc<dyn Receiver>> {
        lock(&self.receiver).clone()
    }

    fn close(&self) {
        lock(&self.stream).flush();
        *lock(&self.receiver) = None;
    }
}
