//! Messaging facade over the console transport.
//!
//! [`ConsoleService`] owns the single driver instance and the event
//! dispatcher, translates every transport lifecycle callback into a named
//! dispatcher event, and exposes the profile/custom-state queries the
//! domain services are built on.

/// The opaque transport trait and its lifecycle event enum.
pub mod driver;
/// In-process transport used by the demo binary and integration tests.
pub mod loopback;

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tracing::warn;

use crate::{
    dispatch::{EventDispatcher, SubscriptionId},
    dto::{DeviceId, DeviceSnapshot, EventEnvelope},
    error::ServiceError,
};

pub use driver::{ConsoleDriver, DriverEvent};

/// The transport finished connecting; params carry the connect code.
pub const EVENT_READY: &str = "console.ready";
/// A device joined; params carry its device id.
pub const EVENT_CONNECT: &str = "console.connect";
/// A device left; params carry its device id.
pub const EVENT_DISCONNECT: &str = "console.disconnect";
/// A device published new custom state; params carry the full blob.
pub const EVENT_DEVICE_STATE_CHANGE: &str = "console.device_state_change";
/// A device profile changed; params carry a fresh snapshot.
pub const EVENT_PROFILE_CHANGE: &str = "console.profile_change";
/// A device was granted premium; params carry its device id.
pub const EVENT_PREMIUM: &str = "console.premium";
/// An ad is about to cover the screen.
pub const EVENT_AD_SHOW: &str = "console.ad_show";
/// The ad break ended; params carry whether an ad was shown.
pub const EVENT_AD_COMPLETE: &str = "console.ad_complete";
/// Persistent data arrived; params carry the uid-keyed data map.
pub const EVENT_PERSISTENT_DATA: &str = "console.persistent_data";
/// High scores arrived; params carry the raw rows.
pub const EVENT_HIGH_SCORES: &str = "console.high_scores";

/// Name and picture of the master controller's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterProfile {
    /// Display name of the master device.
    pub name: String,
    /// Profile picture URL, if any.
    pub picture: Option<String>,
}

/// Facade wrapping the console driver and the event dispatcher.
pub struct ConsoleService {
    driver: Arc<dyn ConsoleDriver>,
    dispatcher: EventDispatcher,
    connect_code: Mutex<Option<String>>,
}

impl ConsoleService {
    /// Wrap a driver instance. One facade per transport connection.
    pub fn new(driver: Arc<dyn ConsoleDriver>) -> Self {
        Self {
            driver,
            dispatcher: EventDispatcher::new(),
            connect_code: Mutex::new(None),
        }
    }

    /// Direct access to the underlying transport.
    pub fn driver(&self) -> &Arc<dyn ConsoleDriver> {
        &self.driver
    }

    /// Translate one transport lifecycle callback into dispatcher events.
    ///
    /// Called once per inbound [`DriverEvent`], always from the single
    /// event-loop task pumping the transport channel.
    pub fn handle_driver_event(&self, event: DriverEvent) {
        match event {
            DriverEvent::Ready { connect_code } => {
                *self
                    .connect_code
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(connect_code.clone());
                self.emit(
                    self.device_id(),
                    EVENT_READY,
                    json!({ "connect_code": connect_code }),
                );
            }
            DriverEvent::Connect { device_id } => {
                self.emit(device_id, EVENT_CONNECT, json!({ "device_id": device_id }));
            }
            DriverEvent::Disconnect { device_id } => {
                self.emit(
                    device_id,
                    EVENT_DISCONNECT,
                    json!({ "device_id": device_id }),
                );
            }
            DriverEvent::Message { from, payload } => match EventEnvelope::from_value(&payload) {
                Ok(Some(envelope)) => self.dispatcher.dispatch(from, &envelope),
                Ok(None) => {}
                Err(err) => warn!(%from, error = %err, "ignoring malformed event envelope"),
            },
            DriverEvent::CustomStateChange { device_id, state } => {
                self.emit(device_id, EVENT_DEVICE_STATE_CHANGE, state);
            }
            DriverEvent::ProfileChange { device_id } => {
                let snapshot = self.device_snapshot(Some(device_id));
                match serde_json::to_value(&snapshot) {
                    Ok(params) => self.emit(device_id, EVENT_PROFILE_CHANGE, params),
                    Err(err) => warn!(%device_id, error = %err, "failed to serialize profile"),
                }
            }
            DriverEvent::Premium { device_id } => {
                self.emit(device_id, EVENT_PREMIUM, json!({ "device_id": device_id }));
            }
            DriverEvent::AdShow => {
                self.emit(self.device_id(), EVENT_AD_SHOW, Value::Null);
            }
            DriverEvent::AdComplete { ad_was_shown } => {
                self.emit(
                    DeviceId::SCREEN,
                    EVENT_AD_COMPLETE,
                    json!({ "ad_was_shown": ad_was_shown }),
                );
            }
            DriverEvent::PersistentDataLoaded { data } => {
                let device_id = self.device_id();
                self.emit(
                    device_id,
                    EVENT_PERSISTENT_DATA,
                    json!({ "device_id": device_id, "data": data }),
                );
            }
            DriverEvent::HighScores { scores } => {
                self.emit(self.device_id(), EVENT_HIGH_SCORES, scores);
            }
        }
    }

    /// Fan a lifecycle-derived event out to local subscribers.
    fn emit(&self, sender: DeviceId, event_name: &str, params: Value) {
        self.dispatcher
            .dispatch(sender, &EventEnvelope::new(event_name, params));
    }

    /// Subscribe a handler to a named event.
    pub fn on<F>(&self, event_name: &str, handler: F) -> Result<SubscriptionId, ServiceError>
    where
        F: Fn(DeviceId, &Value) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(event_name, handler)
    }

    /// Remove a subscription previously installed with [`ConsoleService::on`].
    pub fn off(&self, id: &SubscriptionId) {
        self.dispatcher.unsubscribe(id);
    }

    /// Package an event envelope and unicast it to one device.
    pub fn send_event(
        &self,
        to: DeviceId,
        event_name: &str,
        params: Value,
    ) -> Result<(), ServiceError> {
        let payload = serde_json::to_value(EventEnvelope::new(event_name, params))?;
        self.driver.send(to, payload)?;
        Ok(())
    }

    /// Package an event envelope and broadcast it to all other devices.
    pub fn broadcast_event(&self, event_name: &str, params: Value) -> Result<(), ServiceError> {
        let payload = serde_json::to_value(EventEnvelope::new(event_name, params))?;
        self.driver.broadcast(payload)?;
        Ok(())
    }

    /// Fan an envelope out to local subscribers without touching the wire.
    ///
    /// Domain services use this to re-broadcast derived events.
    pub fn dispatch_local(&self, sender: DeviceId, envelope: &EventEnvelope) {
        self.dispatcher.dispatch(sender, envelope);
    }

    /// The id of the device this facade runs on.
    pub fn device_id(&self) -> DeviceId {
        self.driver.device_id()
    }

    /// Whether this facade runs on the shared screen.
    pub fn is_screen(&self) -> bool {
        self.device_id().is_screen()
    }

    /// True iff the given (or current) device is the master controller.
    pub fn is_master_device(&self, device_id: Option<DeviceId>) -> bool {
        let device_id = device_id.unwrap_or_else(|| self.device_id());
        self.driver.master_device_id() == Some(device_id)
    }

    /// Name and picture of the master controller, when one is connected.
    pub fn master_profile(&self) -> Option<MasterProfile> {
        let master_id = self.driver.master_device_id()?;
        Some(MasterProfile {
            name: self.driver.nickname(master_id),
            picture: self.driver.profile_picture(master_id),
        })
    }

    /// Whether any connected device has premium status.
    pub fn has_premium_device(&self) -> bool {
        !self.driver.premium_device_ids().is_empty()
    }

    /// Assemble a profile snapshot for the given (or current) device.
    pub fn device_snapshot(&self, device_id: Option<DeviceId>) -> DeviceSnapshot {
        let device_id = device_id.unwrap_or_else(|| self.device_id());
        DeviceSnapshot {
            uid: self.driver.uid(device_id),
            device_id,
            name: self.driver.nickname(device_id),
            picture: self.driver.profile_picture(device_id),
            is_master: self.is_master_device(Some(device_id)),
            is_premium: self.driver.is_premium(device_id),
        }
    }

    /// Shallow-merge properties into this device's published custom state.
    pub fn update_custom_data(&self, patch: &Value) -> Result<(), ServiceError> {
        let mut data = self
            .custom_data(None, None)
            .unwrap_or_else(|| json!({}));
        if let (Some(target), Some(source)) = (data.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        self.driver.set_custom_state(data)?;
        Ok(())
    }

    /// Read the custom state of the given (or current) device, optionally
    /// narrowing to one property.
    pub fn custom_data(&self, device_id: Option<DeviceId>, prop: Option<&str>) -> Option<Value> {
        let device_id = device_id.unwrap_or_else(|| self.device_id());
        let state = self.driver.custom_state(device_id)?;
        match prop {
            Some(prop) => state.get(prop).cloned(),
            None => Some(state),
        }
    }

    /// Read one property of the screen's custom state.
    pub fn screen_custom_data(&self, prop: &str) -> Option<Value> {
        self.custom_data(Some(DeviceId::SCREEN), Some(prop))
    }

    /// Set one property inside this device's published custom state.
    pub fn set_custom_property(&self, key: &str, value: Value) -> Result<(), ServiceError> {
        self.driver.set_custom_state_property(key, value)?;
        Ok(())
    }

    /// The connect code, once the transport reported ready.
    pub fn connect_code(&self) -> Option<String> {
        self.connect_code
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The join URL players visit, derived from the connect code.
    pub fn connect_url(&self) -> Result<String, ServiceError> {
        let code = self
            .connect_code()
            .ok_or_else(|| ServiceError::InvalidState("console is not ready yet".into()))?;
        let code: String = code.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(format!("https://www.airconsole.com/#!code={code}"))
    }

    /// Request an advertisement break.
    pub fn show_ad(&self) -> Result<(), ServiceError> {
        self.driver.show_ad()?;
        Ok(())
    }

    /// Ask the transport to load persistent data for the given uids.
    pub fn request_persistent_data(&self, uids: &[String]) -> Result<(), ServiceError> {
        self.driver.request_persistent_data(uids)?;
        Ok(())
    }

    /// Store one key/value pair of persistent data for a uid.
    pub fn store_persistent_data(
        &self,
        key: &str,
        value: Value,
        uid: &str,
    ) -> Result<(), ServiceError> {
        self.driver.store_persistent_data(key, value, uid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::MockDriver;
    use super::*;

    fn facade() -> (Arc<MockDriver>, ConsoleService) {
        let driver = Arc::new(MockDriver::screen());
        let service = ConsoleService::new(driver.clone() as Arc<dyn ConsoleDriver>);
        (driver, service)
    }

    #[test]
    fn connect_callback_becomes_a_named_event() {
        let (_driver, console) = facade();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            console
                .on(EVENT_CONNECT, move |sender, params| {
                    seen.lock().unwrap().push((sender, params.clone()));
                })
                .unwrap();
        }

        console.handle_driver_event(DriverEvent::Connect {
            device_id: DeviceId(2),
        });

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(DeviceId(2), json!({"device_id": 2}))]
        );
    }

    #[test]
    fn inbound_envelopes_are_dispatched_with_their_params() {
        let (_driver, console) = facade();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            console
                .on("score.updated", move |sender, params| {
                    seen.lock().unwrap().push((sender, params.clone()));
                })
                .unwrap();
        }

        console.handle_driver_event(DriverEvent::Message {
            from: DeviceId(4),
            payload: json!({"event_name": "score.updated", "params": {"score": 5}}),
        });

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[(DeviceId(4), json!({"score": 5}))]
        );
    }

    #[test]
    fn payloads_without_an_event_name_are_ignored() {
        let (_driver, console) = facade();
        console
            .on("anything", |_, _| panic!("must not fire"))
            .unwrap();

        console.handle_driver_event(DriverEvent::Message {
            from: DeviceId(4),
            payload: json!({"hello": "world"}),
        });
    }

    #[test]
    fn send_event_packages_an_envelope_for_the_driver() {
        let (driver, console) = facade();
        console
            .send_event(DeviceId(3), "view.path_changed", json!({"view": "lobby"}))
            .unwrap();

        let sent = driver.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, DeviceId(3));
        assert_eq!(
            sent[0].1,
            json!({"event_name": "view.path_changed", "params": {"view": "lobby"}})
        );
    }

    #[test]
    fn broadcast_event_uses_the_broadcast_primitive() {
        let (driver, console) = facade();
        console
            .broadcast_event("round.started", json!({"round": 1}))
            .unwrap();
        assert_eq!(driver.broadcasts().len(), 1);
    }

    #[test]
    fn device_snapshot_assembles_profile_queries() {
        let (driver, console) = facade();
        driver.add_device(DeviceId(1), "Alice", true);

        let snapshot = console.device_snapshot(Some(DeviceId(1)));
        assert_eq!(snapshot.name, "Alice");
        assert_eq!(snapshot.device_id, DeviceId(1));
        assert!(snapshot.is_master);
        assert!(snapshot.is_premium);
        assert!(snapshot.uid.is_some());
    }

    #[test]
    fn connect_url_strips_whitespace_from_the_code() {
        let (_driver, console) = facade();
        console.handle_driver_event(DriverEvent::Ready {
            connect_code: "AB CD".into(),
        });
        assert_eq!(
            console.connect_url().unwrap(),
            "https://www.airconsole.com/#!code=ABCD"
        );
    }

    #[test]
    fn connect_url_before_ready_is_an_invalid_state() {
        let (_driver, console) = facade();
        assert!(matches!(
            console.connect_url(),
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[test]
    fn update_custom_data_merges_into_existing_state() {
        let (driver, console) = facade();
        console.update_custom_data(&json!({"a": 1})).unwrap();
        console.update_custom_data(&json!({"b": 2})).unwrap();
        assert_eq!(driver.custom_state_of(DeviceId::SCREEN), json!({"a": 1, "b": 2}));
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording driver double shared by facade and service tests.

    use std::sync::Mutex;

    use dashmap::DashMap;
    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::error::DriverError;

    /// Profile data the mock reports for one device.
    pub struct MockProfile {
        pub name: String,
        pub uid: String,
        pub premium: bool,
    }

    /// Driver double that records every outbound call.
    pub struct MockDriver {
        own_id: DeviceId,
        master: Mutex<Option<DeviceId>>,
        profiles: DashMap<u32, MockProfile>,
        custom_states: DashMap<u32, Value>,
        sent: Mutex<Vec<(DeviceId, Value)>>,
        broadcasts: Mutex<Vec<Value>>,
        persistent_requests: Mutex<Vec<Vec<String>>>,
        persistent_writes: Mutex<Vec<(String, Value, String)>>,
        high_score_writes: Mutex<Vec<(String, String, i64)>>,
    }

    impl MockDriver {
        /// A mock running as the screen device.
        pub fn screen() -> Self {
            Self::new(DeviceId::SCREEN)
        }

        /// A mock running as the given device.
        pub fn new(own_id: DeviceId) -> Self {
            let driver = Self {
                own_id,
                master: Mutex::new(None),
                profiles: DashMap::new(),
                custom_states: DashMap::new(),
                sent: Mutex::new(Vec::new()),
                broadcasts: Mutex::new(Vec::new()),
                persistent_requests: Mutex::new(Vec::new()),
                persistent_writes: Mutex::new(Vec::new()),
                high_score_writes: Mutex::new(Vec::new()),
            };
            driver.profiles.insert(
                own_id.0,
                MockProfile {
                    name: format!("Guest {}", own_id.0),
                    uid: Uuid::new_v4().to_string(),
                    premium: false,
                },
            );
            driver
        }

        /// Register a device profile; the first master wins.
        pub fn add_device(&self, id: DeviceId, name: &str, premium: bool) {
            self.profiles.insert(
                id.0,
                MockProfile {
                    name: name.to_string(),
                    uid: Uuid::new_v4().to_string(),
                    premium,
                },
            );
            let mut master = self.master.lock().unwrap();
            if master.is_none() && !id.is_screen() {
                *master = Some(id);
            }
        }

        /// Rename a registered device.
        pub fn rename_device(&self, id: DeviceId, name: &str) {
            if let Some(mut profile) = self.profiles.get_mut(&id.0) {
                profile.name = name.to_string();
            }
        }

        /// Every unicast payload sent so far.
        pub fn sent(&self) -> Vec<(DeviceId, Value)> {
            self.sent.lock().unwrap().clone()
        }

        /// Every broadcast payload sent so far.
        pub fn broadcasts(&self) -> Vec<Value> {
            self.broadcasts.lock().unwrap().clone()
        }

        /// Every persistent-data request issued so far.
        pub fn persistent_requests(&self) -> Vec<Vec<String>> {
            self.persistent_requests.lock().unwrap().clone()
        }

        /// Every persistent-data write issued so far.
        pub fn persistent_writes(&self) -> Vec<(String, Value, String)> {
            self.persistent_writes.lock().unwrap().clone()
        }

        /// Every high-score write issued so far.
        pub fn high_score_writes(&self) -> Vec<(String, String, i64)> {
            self.high_score_writes.lock().unwrap().clone()
        }

        /// Published custom state of a device, defaulting to an empty object.
        pub fn custom_state_of(&self, id: DeviceId) -> Value {
            self.custom_states
                .get(&id.0)
                .map(|entry| entry.value().clone())
                .unwrap_or_else(|| json!({}))
        }

        /// Seed the stored custom state of an arbitrary device.
        pub fn seed_custom_state(&self, id: DeviceId, state: Value) {
            self.custom_states.insert(id.0, state);
        }
    }

    impl ConsoleDriver for MockDriver {
        fn device_id(&self) -> DeviceId {
            self.own_id
        }

        fn master_device_id(&self) -> Option<DeviceId> {
            *self.master.lock().unwrap()
        }

        fn nickname(&self, device_id: DeviceId) -> String {
            self.profiles
                .get(&device_id.0)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| format!("Guest {}", device_id.0))
        }

        fn profile_picture(&self, _device_id: DeviceId) -> Option<String> {
            None
        }

        fn uid(&self, device_id: DeviceId) -> Option<String> {
            self.profiles.get(&device_id.0).map(|p| p.uid.clone())
        }

        fn is_premium(&self, device_id: DeviceId) -> bool {
            self.profiles
                .get(&device_id.0)
                .map(|p| p.premium)
                .unwrap_or(false)
        }

        fn premium_device_ids(&self) -> Vec<DeviceId> {
            self.profiles
                .iter()
                .filter(|entry| entry.value().premium)
                .map(|entry| DeviceId(*entry.key()))
                .collect()
        }

        fn send(&self, to: DeviceId, payload: Value) -> Result<(), DriverError> {
            self.sent.lock().unwrap().push((to, payload));
            Ok(())
        }

        fn broadcast(&self, payload: Value) -> Result<(), DriverError> {
            self.broadcasts.lock().unwrap().push(payload);
            Ok(())
        }

        fn custom_state(&self, device_id: DeviceId) -> Option<Value> {
            self.custom_states
                .get(&device_id.0)
                .map(|entry| entry.value().clone())
        }

        fn set_custom_state(&self, state: Value) -> Result<(), DriverError> {
            self.custom_states.insert(self.own_id.0, state);
            Ok(())
        }

        fn set_custom_state_property(&self, key: &str, value: Value) -> Result<(), DriverError> {
            let mut state = self.custom_state_of(self.own_id);
            if let Some(map) = state.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            self.custom_states.insert(self.own_id.0, state);
            Ok(())
        }

        fn request_persistent_data(&self, uids: &[String]) -> Result<(), DriverError> {
            self.persistent_requests.lock().unwrap().push(uids.to_vec());
            Ok(())
        }

        fn store_persistent_data(
            &self,
            key: &str,
            value: Value,
            uid: &str,
        ) -> Result<(), DriverError> {
            self.persistent_writes
                .lock()
                .unwrap()
                .push((key.to_string(), value, uid.to_string()));
            Ok(())
        }

        fn store_high_score(
            &self,
            leaderboard: &str,
            version: &str,
            score: i64,
            _uid: &str,
            _data: Value,
            _label: Option<String>,
        ) -> Result<(), DriverError> {
            self.high_score_writes.lock().unwrap().push((
                leaderboard.to_string(),
                version.to_string(),
                score,
            ));
            Ok(())
        }

        fn request_high_scores(
            &self,
            _leaderboard: &str,
            _version: &str,
            _uids: &[String],
        ) -> Result<(), DriverError> {
            Ok(())
        }

        fn show_ad(&self) -> Result<(), DriverError> {
            Ok(())
        }
    }
}
