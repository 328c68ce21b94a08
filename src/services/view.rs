//! View navigation fan-out between screen and controllers.
//!
//! Every device renders exactly one view at a time, identified by a path
//! string. Local navigation swaps the current path and invokes the
//! registered navigation callback; remote navigation sends a
//! `view.path_changed` event that the receiving device's service turns
//! into the same local navigation.

use std::sync::{Arc, Mutex, Weak};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{console::ConsoleService, dto::DeviceId, error::ServiceError};

/// A device was asked to show another view; params carry `{path, params}`.
pub const EVENT_VIEW_PATH_CHANGED: &str = "view.path_changed";

type NavigateFn = Box<dyn Fn(&str, &Value) + Send + Sync>;

/// Per-device view navigation.
pub struct ViewService {
    console: Arc<ConsoleService>,
    current: Mutex<Option<String>>,
    navigate: Mutex<Option<NavigateFn>>,
}

impl ViewService {
    /// Create the service with no current view.
    pub fn new(console: Arc<ConsoleService>) -> Arc<Self> {
        Arc::new(Self {
            console,
            current: Mutex::new(None),
            navigate: Mutex::new(None),
        })
    }

    /// Turn inbound path-change events into local navigation.
    pub fn attach(self: &Arc<Self>) -> Result<(), ServiceError> {
        let service: Weak<Self> = Arc::downgrade(self);
        self.console
            .on(EVENT_VIEW_PATH_CHANGED, move |sender, params| {
                let Some(service) = service.upgrade() else {
                    return;
                };
                let Some(path) = params.get("path").and_then(Value::as_str) else {
                    warn!(%sender, "view.path_changed without a path");
                    return;
                };
                let view_params = params.get("params").cloned().unwrap_or(Value::Null);
                service.go(path, &view_params);
            })?;
        Ok(())
    }

    /// Register the callback invoked on every local navigation.
    ///
    /// Replaces any previously registered callback.
    pub fn on_navigate<F>(&self, callback: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        *self
            .navigate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(callback));
    }

    /// The path of the view currently shown, if navigation happened yet.
    pub fn current(&self) -> Option<String> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Navigate this device to `path`, invoking the registered callback.
    pub fn go(&self, path: &str, params: &Value) {
        debug!(path, "navigating");
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(path.to_string());
        let navigate = self
            .navigate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(callback) = navigate.as_ref() {
            callback(path, params);
        }
    }

    /// Send one device to `path`.
    pub fn device_go(
        &self,
        device_id: DeviceId,
        path: &str,
        params: Value,
    ) -> Result<(), ServiceError> {
        self.console.send_event(
            device_id,
            EVENT_VIEW_PATH_CHANGED,
            json!({ "path": path, "params": params }),
        )
    }

    /// Send the master controller to `path`.
    pub fn master_go(&self, path: &str, params: Value) -> Result<(), ServiceError> {
        let master = self
            .console
            .driver()
            .master_device_id()
            .ok_or_else(|| ServiceError::InvalidState("no master controller".into()))?;
        self.device_go(master, path, params)
    }

    /// Send every other device to `path`, optionally navigating locally too.
    pub fn all_go(&self, path: &str, params: Value, include_local: bool) -> Result<(), ServiceError> {
        self.console.broadcast_event(
            EVENT_VIEW_PATH_CHANGED,
            json!({ "path": path, "params": params.clone() }),
        )?;
        if include_local {
            self.go(path, &params);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::console::{ConsoleDriver, DriverEvent, testing::MockDriver};

    use super::*;

    fn setup(device: DeviceId) -> (Arc<MockDriver>, Arc<ConsoleService>, Arc<ViewService>) {
        let driver = Arc::new(MockDriver::new(device));
        let console = Arc::new(ConsoleService::new(driver.clone() as Arc<dyn ConsoleDriver>));
        let service = ViewService::new(Arc::clone(&console));
        service.attach().unwrap();
        (driver, console, service)
    }

    #[test]
    fn local_navigation_updates_current_and_fires_the_callback() {
        let (_driver, _console, service) = setup(DeviceId::SCREEN);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            service.on_navigate(move |path, params| {
                seen.lock().unwrap().push((path.to_string(), params.clone()));
            });
        }

        service.go("lobby", &json!({"from": "boot"}));

        assert_eq!(service.current().as_deref(), Some("lobby"));
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("lobby".to_string(), json!({"from": "boot"}))]
        );
    }

    #[test]
    fn inbound_path_change_navigates_locally() {
        let (_driver, console, service) = setup(DeviceId(2));
        console.handle_driver_event(DriverEvent::Message {
            from: DeviceId::SCREEN,
            payload: json!({
                "event_name": EVENT_VIEW_PATH_CHANGED,
                "params": {"path": "round/1", "params": {"round": 1}}
            }),
        });
        assert_eq!(service.current().as_deref(), Some("round/1"));
    }

    #[test]
    fn device_go_sends_the_path_change_event() {
        let (driver, _console, service) = setup(DeviceId::SCREEN);
        service.device_go(DeviceId(3), "scores", json!({})).unwrap();

        let sent = driver.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, DeviceId(3));
        assert_eq!(
            sent[0].1,
            json!({
                "event_name": EVENT_VIEW_PATH_CHANGED,
                "params": {"path": "scores", "params": {}}
            })
        );
    }

    #[test]
    fn master_go_targets_the_master_controller() {
        let (driver, _console, service) = setup(DeviceId::SCREEN);
        driver.add_device(DeviceId(5), "Alice", false);
        service.master_go("admin", Value::Null).unwrap();
        assert_eq!(driver.sent()[0].0, DeviceId(5));
    }

    #[test]
    fn master_go_without_a_master_is_an_invalid_state() {
        let (_driver, _console, service) = setup(DeviceId::SCREEN);
        assert!(matches!(
            service.master_go("admin", Value::Null),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[test]
    fn all_go_broadcasts_and_optionally_navigates_locally() {
        let (driver, _console, service) = setup(DeviceId::SCREEN);
        service.all_go("round/2", json!({}), true).unwrap();

        assert_eq!(driver.broadcasts().len(), 1);
        assert_eq!(service.current().as_deref(), Some("round/2"));
    }
}
