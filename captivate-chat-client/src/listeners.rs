//! Per-conversation listener registry

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Callback invoked with the payload of a matching inbound event.
///
/// The handle's identity is what [`ListenerRegistry::remove`] matches on, so
/// keep the `Arc` returned at registration to remove it later.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Ordered multimap from event tag to callbacks
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener for `event_type`
    pub fn add(&self, event_type: impl Into<String>, listener: Listener) {
        self.listeners
            .lock()
            .entry(event_type.into())
            .or_default()
            .push(listener);
    }

    /// Remove every registration of `listener` under `event_type`.
    ///
    /// Returns whether anything was removed; removing twice is a no-op.
    pub fn remove(&self, event_type: &str, listener: &Listener) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(callbacks) = listeners.get_mut(event_type) else {
            return false;
        };

        let before = callbacks.len();
        callbacks.retain(|cb| !Arc::ptr_eq(cb, listener));
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            listeners.remove(event_type);
        }
        removed
    }

    /// Invoke the listeners for `event_type` in registration order.
    ///
    /// The list is snapshotted first, so callbacks may register or remove
    /// listeners without deadlocking; such changes apply from the next event.
    /// A panicking callback is logged and skipped; the rest still run.
    pub fn emit(&self, event_type: &str, payload: &Value) -> usize {
        let snapshot: Vec<Listener> = match self.listeners.lock().get(event_type) {
            Some(callbacks) => callbacks.clone(),
            None => return 0,
        };

        for callback in &snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                error!(
                    event_type,
                    "Listener panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        snapshot.len()
    }

    /// Number of listeners registered for `event_type`
    pub fn count(&self, event_type: &str) -> usize {
        self.listeners
            .lock()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Number of listeners across all tags
    pub fn total(&self) -> usize {
        self.listeners.lock().values().map(Vec::len).sum()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        return *msg;
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.as_str();
    }
    "non-string panic payload"
}
