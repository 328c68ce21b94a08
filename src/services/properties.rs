//! Custom-state property trackers.
//!
//! Devices communicate slow-changing facts (current game phase, roster,
//! selections) by publishing them as properties of their custom state.
//! This service watches the `console.device_state_change` events and
//! invokes registered callbacks whenever a tracked property's value
//! actually changes on some device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    console::{ConsoleService, EVENT_DEVICE_STATE_CHANGE},
    dto::DeviceId,
    error::ServiceError,
};

type TrackerFn = Arc<dyn Fn(DeviceId, &Value) + Send + Sync>;

/// Watches published custom-state properties across devices.
pub struct PropertyService {
    console: Arc<ConsoleService>,
    trackers: Mutex<IndexMap<String, Vec<TrackerFn>>>,
    last_seen: Mutex<HashMap<(DeviceId, String), Value>>,
}

impl PropertyService {
    /// Create the service with no trackers.
    pub fn new(console: Arc<ConsoleService>) -> Arc<Self> {
        Arc::new(Self {
            console,
            trackers: Mutex::new(IndexMap::new()),
            last_seen: Mutex::new(HashMap::new()),
        })
    }

    /// Start watching device state changes.
    pub fn attach(self: &Arc<Self>) -> Result<(), ServiceError> {
        let service: Weak<Self> = Arc::downgrade(self);
        self.console
            .on(EVENT_DEVICE_STATE_CHANGE, move |sender, state| {
                let Some(service) = service.upgrade() else {
                    return;
                };
                service.handle_state_change(sender, state);
            })?;
        Ok(())
    }

    /// Invoke `callback` whenever `property` changes on any device.
    pub fn track<F>(&self, property: &str, callback: F)
    where
        F: Fn(DeviceId, &Value) + Send + Sync + 'static,
    {
        self.lock_trackers()
            .entry(property.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Publish `value` under `property` in this device's custom state.
    pub fn set(&self, property: &str, value: Value) -> Result<(), ServiceError> {
        self.console.set_custom_property(property, value)
    }

    /// Read `property` from the given device's published state.
    pub fn get(&self, device_id: DeviceId, property: &str) -> Option<Value> {
        self.console.custom_data(Some(device_id), Some(property))
    }

    fn handle_state_change(&self, sender: DeviceId, state: &Value) {
        let Some(state) = state.as_object() else {
            return;
        };
        // Callbacks run outside the locks so they may call track() or set().
        let mut pending: Vec<(Vec<TrackerFn>, Value)> = Vec::new();
        {
            let trackers = self.lock_trackers();
            let mut last_seen = self
                .last_seen
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for (property, callbacks) in trackers.iter() {
                let Some(value) = state.get(property) else {
                    continue;
                };
                let slot = (sender, property.clone());
                if last_seen.get(&slot) == Some(value) {
                    continue;
                }
                last_seen.insert(slot, value.clone());
                pending.push((callbacks.clone(), value.clone()));
            }
        }
        for (callbacks, value) in pending {
            for callback in callbacks {
                callback(sender, &value);
            }
        }
    }

    fn lock_trackers(&self) -> MutexGuard<'_, IndexMap<String, Vec<TrackerFn>>> {
        self.trackers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
