//! Named-event dispatch over a single inbound message callback.
//!
//! The console transport delivers every inbound message through one
//! callback; this registry turns that into any number of named-event
//! subscriptions. Fan-out order is insertion order. Unsubscribing
//! tombstones the slot instead of removing it so a dispatch already
//! iterating the registry never observes a vanished entry; slots are
//! never reclaimed for the lifetime of the dispatcher.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    dto::{DeviceId, EventEnvelope},
    error::ServiceError,
};

/// Handle returned by [`EventDispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Callback invoked with the sender device and the envelope params.
pub type EventHandler = Arc<dyn Fn(DeviceId, &Value) + Send + Sync>;

type Registry = IndexMap<String, IndexMap<SubscriptionId, Option<EventHandler>>>;

/// Fan-out registry mapping event names to subscribed handlers.
#[derive(Default)]
pub struct EventDispatcher {
    registry: Mutex<Registry>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_name`, returning a fresh subscription id.
    ///
    /// Fails with [`ServiceError::InvalidInput`] when the event name is empty.
    pub fn subscribe<F>(&self, event_name: &str, handler: F) -> Result<SubscriptionId, ServiceError>
    where
        F: Fn(DeviceId, &Value) + Send + Sync + 'static,
    {
        if event_name.is_empty() {
            return Err(ServiceError::InvalidInput(
                "event name must not be empty".into(),
            ));
        }

        let id = SubscriptionId::generate();
        let mut registry = self.lock();
        registry
            .entry(event_name.to_string())
            .or_default()
            .insert(id, Some(Arc::new(handler)));
        Ok(id)
    }

    /// Tombstone every registry slot matching `id`.
    ///
    /// Idempotent: unknown or already-unsubscribed ids are a silent no-op.
    /// The slot itself stays behind so a dispatch in progress keeps a stable
    /// view of the registry.
    pub fn unsubscribe(&self, id: &SubscriptionId) {
        let mut registry = self.lock();
        for slots in registry.values_mut() {
            if let Some(slot) = slots.get_mut(id) {
                *slot = None;
            }
        }
    }

    /// Fan an inbound envelope out to every active subscriber of its event.
    ///
    /// Handlers run synchronously in insertion order with `(sender, params)`.
    /// An event with zero active listeners is a silent no-op; tombstoned
    /// slots are skipped. The registry lock is released before any handler
    /// runs, so handlers may subscribe, unsubscribe or dispatch again.
    pub fn dispatch(&self, sender: DeviceId, envelope: &EventEnvelope) {
        let handlers: Vec<EventHandler> = {
            let registry = self.lock();
            match registry.get(&envelope.event_name) {
                Some(slots) => slots.values().flatten().cloned().collect(),
                None => return,
            }
        };

        for handler in handlers {
            handler(sender, &envelope.params);
        }
    }

    /// Number of active (non-tombstoned) subscriptions for `event_name`.
    pub fn active_subscriptions(&self, event_name: &str) -> usize {
        self.lock()
            .get(event_name)
            .map(|slots| slots.values().flatten().count())
            .unwrap_or(0)
    }

    /// Total number of registry slots for `event_name`, tombstones included.
    pub fn registered_slots(&self, event_name: &str) -> usize {
        self.lock().get(event_name).map(IndexMap::len).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // A panicking handler must not wedge the whole dispatcher.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
