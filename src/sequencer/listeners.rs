//! Listener registrations and their fault-tolerant dispatch.

use crate::{
    device::same_object,
    message::{Message, MetaMessage, ShortMessage},
    prelude::*,
};
use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
};

/// Notified of every meta message the sequencer plays or records.
///
/// Any `Fn(&MetaMessage)` closure is a meta listener.
pub trait MetaEventListener: Send + Sync {
    fn meta(&self, message: &MetaMessage);
}
impl<F> MetaEventListener for F
where
    F: Fn(&MetaMessage) + Send + Sync,
{
    fn meta(&self, message: &MetaMessage) {
        self(message)
    }
}

/// Notified of control change messages for the controller numbers it registered for.
///
/// Any `Fn(&ShortMessage)` closure is a controller listener.
pub trait ControllerEventListener: Send + Sync {
    fn control_change(&self, message: &ShortMessage);
}
impl<F> ControllerEventListener for F
where
    F: Fn(&ShortMessage) + Send + Sync,
{
    fn control_change(&self, message: &ShortMessage) {
        self(message)
    }
}

/// Run user code, logging instead of unwinding into the caller.
pub(super) fn guarded(what: &str, call: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(call)).is_err() {
        log::warn!("{} panicked, skipping it", what);
    }
}

#[derive(Default)]
pub(super) struct Listeners {
    meta: Mutex<Vec<Arc<dyn MetaEventListener>>>,
    controllers: Mutex<HashMap<u8, Vec<Arc<dyn ControllerEventListener>>>>,
}
impl Listeners {
    /// Returns `false` if the listener was already registered.
    pub fn add_meta(&self, listener: Arc<dyn MetaEventListener>) -> bool {
        let mut meta = lock(&self.meta);
        if meta.iter().any(|l| same_object(l, &listener)) {
            false
        } else {
            meta.push(listener);
            true
        }
    }

    pub fn remove_meta(&self, listener: &Arc<dyn MetaEventListener>) {
        lock(&self.meta).retain(|l| !same_object(l, listener));
    }

    /// Register for the given controller numbers, returning the controllers the listener is
    /// registered for afterwards.
    pub fn add_controller(
        &self,
        listener: Arc<dyn ControllerEventListener>,
        controllers: &[u8],
    ) -> Result<Vec<u8>> {
        ensure!(
            controllers.iter().all(|&c| c < 0x80),
            err_param!("controller number out of range 0..=127")
        );
        let mut map = lock(&self.controllers);
        for &controller in controllers {
            let listeners = map.entry(controller).or_default();
            if !listeners.iter().any(|l| same_object(l, &listener)) {
                listeners.push(listener.clone());
            }
        }
        Ok(registered_for(&map, &listener))
    }

    /// Unregister from the given controller numbers, returning the controllers the listener is
    /// still registered for.
    pub fn remove_controller(
        &self,
        listener: &Arc<dyn ControllerEventListener>,
        controllers: &[u8],
    ) -> Vec<u8> {
        let mut map = lock(&self.controllers);
        for controller in controllers {
            if let Some(listeners) = map.get_mut(controller) {
                listeners.retain(|l| !same_object(l, listener));
                if listeners.is_empty() {
                    map.remove(controller);
                }
            }
        }
        registered_for(&map, listener)
    }

    pub fn clear(&self) {
        lock(&self.meta).clear();
        lock(&self.controllers).clear();
    }

    /// Notify the listeners interested in a message.
    ///
    /// Listeners are snapshotted first, so they may register or unregister listeners from
    /// within the callback.
    pub fn fire(&self, message: &Message) {
        match message {
            Message::Meta(meta) => {
                let listeners = lock(&self.meta).clone();
                for listener in listeners {
                    guarded("meta listener", || listener.meta(meta));
                }
            }
            Message::Short(short) if short.is_control_change() => {
                let listeners = lock(&self.controllers)
                    .get(&short.data1())
                    .cloned()
                    .unwrap_or_default();
                for listener in listeners {
                    guarded("controller listener", || listener.control_change(short));
                }
            }
            _ => {}
        }
    }
}

fn registered_for(
    map: &HashMap<u8, Vec<Arc<dyn ControllerEventListener>>>,
    listener: &Arc<dyn ControllerEventListener>,
) -> Vec<u8> {
    let mut controllers = map
        .iter()
        .filter(|(_, listeners)| listeners.iter().any(|l| same_object(l, listener)))
        .map(|(&controller, _)| controller)
        .collect::<Vec<_>>();
    controllers.sort_unstable();
    controllers
}
