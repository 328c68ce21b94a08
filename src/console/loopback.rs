//! In-process console transport.
//!
//! [`LoopbackHub`] relays [`DriverEvent`]s between one screen endpoint and
//! any number of controller endpoints over unbounded channels. Delivery is
//! best effort: endpoints that already left simply miss the message. This
//! exists so the full stack can run and be tested without a vendor SDK; it
//! is plumbing, not a network protocol.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use dashmap::DashMap;
use rand::Rng;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::{
    console::driver::{ConsoleDriver, DriverEvent},
    dto::DeviceId,
    error::DriverError,
};

const CONNECT_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CONNECT_CODE_LEN: usize = 8;

/// Profile the hub reports for one endpoint.
struct Profile {
    name: String,
    uid: String,
    premium: bool,
}

struct Endpoint {
    tx: mpsc::UnboundedSender<DriverEvent>,
    profile: Profile,
}

/// One stored high-score row.
struct HighScoreRow {
    leaderboard: String,
    version: String,
    score: i64,
    uid: String,
    data: Value,
    label: Option<String>,
}

struct HubInner {
    endpoints: DashMap<u32, Endpoint>,
    custom_states: DashMap<u32, Value>,
    persistent: DashMap<String, Value>,
    high_scores: Mutex<Vec<HighScoreRow>>,
    next_device: AtomicU32,
    connect_code: String,
}

impl HubInner {
    /// Deliver an event to one endpoint, dropping it when the endpoint left.
    fn deliver(&self, to: u32, event: DriverEvent) {
        if let Some(endpoint) = self.endpoints.get(&to) {
            let _ = endpoint.tx.send(event);
        }
    }

    /// Deliver an event to every endpoint except `skip`.
    fn deliver_others(&self, skip: u32, event: &DriverEvent) {
        for entry in self.endpoints.iter() {
            if *entry.key() != skip {
                let _ = entry.value().tx.send(event.clone());
            }
        }
    }

    /// Deliver an event to every connected endpoint.
    fn deliver_all(&self, event: &DriverEvent) {
        for entry in self.endpoints.iter() {
            let _ = entry.value().tx.send(event.clone());
        }
    }

    fn master_device_id(&self) -> Option<DeviceId> {
        self.endpoints
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| *id != DeviceId::SCREEN.0)
            .min()
            .map(DeviceId)
    }
}

/// In-memory console session relaying events between its endpoints.
pub struct LoopbackHub {
    inner: Arc<HubInner>,
}

impl LoopbackHub {
    /// Create an empty hub with a freshly generated connect code.
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let connect_code: String = (0..CONNECT_CODE_LEN)
            .map(|_| CONNECT_CODE_ALPHABET[rng.random_range(0..CONNECT_CODE_ALPHABET.len())] as char)
            .collect();
        Self {
            inner: Arc::new(HubInner {
                endpoints: DashMap::new(),
                custom_states: DashMap::new(),
                persistent: DashMap::new(),
                high_scores: Mutex::new(Vec::new()),
                next_device: AtomicU32::new(1),
                connect_code,
            }),
        }
    }

    /// The connect code every endpoint of this hub reports.
    pub fn connect_code(&self) -> &str {
        &self.inner.connect_code
    }

    /// Attach the screen endpoint (device 0).
    pub fn attach_screen(&self) -> LoopbackConsole {
        self.attach(DeviceId::SCREEN, "Screen")
    }

    /// Attach a controller endpoint with the next free device id.
    ///
    /// The new endpoint receives `Ready` plus one `Connect` per device
    /// already present; everyone else receives `Connect` for the newcomer.
    pub fn join(&self, name: &str) -> LoopbackConsole {
        let id = DeviceId(self.inner.next_device.fetch_add(1, Ordering::SeqCst));
        self.attach(id, name)
    }

    /// Detach an endpoint, notifying the remaining devices.
    pub fn leave(&self, device_id: DeviceId) {
        if self.inner.endpoints.remove(&device_id.0).is_some() {
            debug!(%device_id, "loopback endpoint left");
            self.inner
                .deliver_all(&DriverEvent::Disconnect { device_id });
        }
    }

    /// Change an endpoint's display name and fan out the profile change.
    pub fn rename(&self, device_id: DeviceId, name: &str) {
        if let Some(mut endpoint) = self.inner.endpoints.get_mut(&device_id.0) {
            endpoint.profile.name = name.to_string();
        } else {
            return;
        }
        self.inner
            .deliver_all(&DriverEvent::ProfileChange { device_id });
    }

    /// Grant premium status to an endpoint and fan out the notification.
    pub fn grant_premium(&self, device_id: DeviceId) {
        if let Some(mut endpoint) = self.inner.endpoints.get_mut(&device_id.0) {
            endpoint.profile.premium = true;
        } else {
            return;
        }
        self.inner.deliver_all(&DriverEvent::Premium { device_id });
    }

    fn attach(&self, id: DeviceId, name: &str) -> LoopbackConsole {
        let (tx, rx) = mpsc::unbounded_channel();
        let newcomer = DriverEvent::Connect { device_id: id };
        self.inner.endpoints.insert(
            id.0,
            Endpoint {
                tx: tx.clone(),
                profile: Profile {
                    name: name.to_string(),
                    uid: Uuid::new_v4().to_string(),
                    premium: false,
                },
            },
        );
        debug!(device_id = %id, name, "loopback endpoint joined");

        let _ = tx.send(DriverEvent::Ready {
            connect_code: self.inner.connect_code.clone(),
        });
        for entry in self.inner.endpoints.iter() {
            if *entry.key() != id.0 {
                // Existing devices learn about the newcomer; the newcomer
                // catches up on everyone already present.
                let _ = entry.value().tx.send(newcomer.clone());
                let _ = tx.send(DriverEvent::Connect {
                    device_id: DeviceId(*entry.key()),
                });
            }
        }

        LoopbackConsole {
            hub: Arc::clone(&self.inner),
            id,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint's view of a [`LoopbackHub`], implementing [`ConsoleDriver`].
pub struct LoopbackConsole {
    hub: Arc<HubInner>,
    id: DeviceId,
    rx: Mutex<Option<mpsc::UnboundedReceiver<DriverEvent>>>,
}

impl LoopbackConsole {
    /// Take the lifecycle event receiver; yields `None` on repeat calls.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<DriverEvent>> {
        self.rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl ConsoleDriver for LoopbackConsole {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn master_device_id(&self) -> Option<DeviceId> {
        self.hub.master_device_id()
    }

    fn nickname(&self, device_id: DeviceId) -> String {
        self.hub
            .endpoints
            .get(&device_id.0)
            .map(|endpoint| endpoint.profile.name.clone())
            .unwrap_or_else(|| format!("Guest {}", device_id.0))
    }

    fn profile_picture(&self, _device_id: DeviceId) -> Option<String> {
        None
    }

    fn uid(&self, device_id: DeviceId) -> Option<String> {
        self.hub
            .endpoints
            .get(&device_id.0)
            .map(|endpoint| endpoint.profile.uid.clone())
    }

    fn is_premium(&self, device_id: DeviceId) -> bool {
        self.hub
            .endpoints
            .get(&device_id.0)
            .map(|endpoint| endpoint.profile.premium)
            .unwrap_or(false)
    }

    fn premium_device_ids(&self) -> Vec<DeviceId> {
        self.hub
            .endpoints
            .iter()
            .filter(|entry| entry.value().profile.premium)
            .map(|entry| DeviceId(*entry.key()))
            .collect()
    }

    fn send(&self, to: DeviceId, payload: Value) -> Result<(), DriverError> {
        let endpoint = self
            .hub
            .endpoints
            .get(&to.0)
            .ok_or(DriverError::UnknownDevice(to.0))?;
        endpoint
            .tx
            .send(DriverEvent::Message {
                from: self.id,
                payload,
            })
            .map_err(|_| DriverError::ChannelClosed(to.0))
    }

    fn broadcast(&self, payload: Value) -> Result<(), DriverError> {
        self.hub.deliver_others(
            self.id.0,
            &DriverEvent::Message {
                from: self.id,
                payload,
            },
        );
        Ok(())
    }

    fn custom_state(&self, device_id: DeviceId) -> Option<Value> {
        self.hub
            .custom_states
            .get(&device_id.0)
            .map(|entry| entry.value().clone())
    }

    fn set_custom_state(&self, state: Value) -> Result<(), DriverError> {
        self.hub.custom_states.insert(self.id.0, state.clone());
        self.hub.deliver_all(&DriverEvent::CustomStateChange {
            device_id: self.id,
            state,
        });
        Ok(())
    }

    fn set_custom_state_property(&self, key: &str, value: Value) -> Result<(), DriverError> {
        let mut state = self
            .custom_state(self.id)
            .unwrap_or_else(|| Value::Object(Map::new()));
        if let Some(map) = state.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self.set_custom_state(state)
    }

    fn request_persistent_data(&self, uids: &[String]) -> Result<(), DriverError> {
        let mut data = Map::new();
        for uid in uids {
            if let Some(stored) = self.hub.persistent.get(uid) {
                data.insert(uid.clone(), stored.value().clone());
            }
        }
        self.hub.deliver(
            self.id.0,
            DriverEvent::PersistentDataLoaded {
                data: Value::Object(data),
            },
        );
        Ok(())
    }

    fn store_persistent_data(
        &self,
        key: &str,
        value: Value,
        uid: &str,
    ) -> Result<(), DriverError> {
        let mut entry = self
            .hub
            .persistent
            .entry(uid.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(map) = entry.value_mut().as_object_mut() {
            map.insert(key.to_string(), value);
        }
        Ok(())
    }

    fn store_high_score(
        &self,
        leaderboard: &str,
        version: &str,
        score: i64,
        uid: &str,
        data: Value,
        label: Option<String>,
    ) -> Result<(), DriverError> {
        let mut rows = self
            .hub
            .high_scores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.push(HighScoreRow {
            leaderboard: leaderboard.to_string(),
            version: version.to_string(),
            score,
            uid: uid.to_string(),
            data,
            label,
        });
        Ok(())
    }

    fn request_high_scores(
        &self,
        leaderboard: &str,
        version: &str,
        uids: &[String],
    ) -> Result<(), DriverError> {
        let rows = self
            .hub
            .high_scores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut matches: Vec<&HighScoreRow> = rows
            .iter()
            .filter(|row| {
                row.leaderboard == leaderboard
                    && row.version == version
                    && (uids.is_empty() || uids.contains(&row.uid))
            })
            .collect();
        matches.sort_by(|a, b| b.score.cmp(&a.score));

        let scores: Vec<Value> = matches
            .iter()
            .map(|row| {
                json!({
                    "leaderboard": row.leaderboard,
                    "score": row.score,
                    "uid": row.uid,
                    "data": row.data,
                    "label": row.label,
                })
            })
            .collect();
        drop(rows);

        self.hub.deliver(
            self.id.0,
            DriverEvent::HighScores {
                scores: Value::Array(scores),
            },
        );
        Ok(())
    }

    fn show_ad(&self) -> Result<(), DriverError> {
        self.hub.deliver_all(&DriverEvent::AdShow);
        self.hub
            .deliver_all(&DriverEvent::AdComplete { ad_was_shown: true });
        Ok(())
    }
}
