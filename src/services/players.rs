//! Screen-side player roster.
//!
//! Tracks one [`Player`] per connected controller, assigns colors from the
//! configured palette, publishes the roster through the screen's custom
//! state and re-broadcasts derived `player.*` events for the UI layer.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::warn;

use crate::{
    console::{
        ConsoleService, EVENT_CONNECT, EVENT_DISCONNECT, EVENT_PERSISTENT_DATA,
        EVENT_PROFILE_CHANGE,
    },
    dto::{DeviceId, EventEnvelope},
    error::ServiceError,
};

/// A player joined; params carry the full player record.
pub const EVENT_PLAYER_ADDED: &str = "player.added";
/// A player left; params carry the device id.
pub const EVENT_PLAYER_REMOVED: &str = "player.removed";
/// A player's profile changed; params carry the updated record.
pub const EVENT_PLAYER_PROFILE_CHANGED: &str = "player.profile_changed";

/// Persistent-data key under which each player's last visit is stored.
const STORAGE_LAST_VISIT_KEY: &str = "player.last_visit_ts";
/// Custom-state property under which the screen publishes the roster.
const ROSTER_STATE_KEY: &str = "players";
/// Screen custom-state property naming the current game state.
const CURRENT_STATE_KEY: &str = "current_state";

/// Per-question answer counters for one player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerStats {
    /// Answers given in total.
    pub total: u32,
    /// Answers that were correct.
    pub correct: u32,
}

/// One entry of the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    /// Stable per-user id, when the transport knows one.
    pub uid: Option<String>,
    /// The controller this player holds.
    pub device_id: DeviceId,
    /// Display name from the device profile.
    pub name: String,
    /// Profile picture URL, if any.
    pub picture: Option<String>,
    /// Whether this player holds the master controller.
    pub is_master: bool,
    /// Whether this player's device is premium.
    pub is_premium: bool,
    /// Assigned roster color (hex).
    pub color: String,
    /// Accumulated score.
    pub score: i64,
    /// Answer counters keyed by question uid.
    pub answers: IndexMap<String, AnswerStats>,
    /// False when the player joined mid-round and sits this one out.
    pub active_round: bool,
    /// Unix-ms timestamp of the player's previous visit, once loaded.
    pub last_visit_ts: Option<i64>,
}

/// Roster service; only does anything when attached on the screen.
pub struct PlayerService {
    console: Arc<ConsoleService>,
    colors: Vec<String>,
    roster: Mutex<IndexMap<DeviceId, Player>>,
}

impl PlayerService {
    /// Create the roster service with the configured color palette.
    pub fn new(console: Arc<ConsoleService>, colors: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            console,
            colors,
            roster: Mutex::new(IndexMap::new()),
        })
    }

    /// Install the connect/disconnect/profile subscriptions.
    ///
    /// A no-op on controllers: only the screen owns the roster.
    pub fn attach(self: &Arc<Self>) -> Result<(), ServiceError> {
        if !self.console.is_screen() {
            return Ok(());
        }

        let service = Arc::downgrade(self);
        self.console.on(EVENT_CONNECT, move |sender, params| {
            let Some(service) = service.upgrade() else {
                return;
            };
            let Some(device_id) = device_id_param(params) else {
                return;
            };
            match service.add_player(device_id) {
                Ok(Some(player)) => match serde_json::to_value(&player) {
                    Ok(record) => service.console.dispatch_local(
                        sender,
                        &EventEnvelope::new(EVENT_PLAYER_ADDED, json!({ "player": record })),
                    ),
                    Err(err) => warn!(%device_id, error = %err, "failed to serialize player"),
                },
                Ok(None) => {}
                Err(err) => warn!(%device_id, error = %err, "failed to add player"),
            }
        })?;

        let service = Arc::downgrade(self);
        self.console.on(EVENT_DISCONNECT, move |sender, params| {
            let Some(service) = service.upgrade() else {
                return;
            };
            let Some(device_id) = device_id_param(params) else {
                return;
            };
            match service.remove_player(device_id) {
                Ok(_) => service.console.dispatch_local(
                    sender,
                    &EventEnvelope::new(EVENT_PLAYER_REMOVED, json!({ "device_id": device_id })),
                ),
                Err(err) => warn!(%device_id, error = %err, "failed to remove player"),
            }
        })?;

        let service = Arc::downgrade(self);
        self.console.on(EVENT_PROFILE_CHANGE, move |sender, params| {
            let Some(service) = service.upgrade() else {
                return;
            };
            service.apply_profile_change(sender, params);
        })?;

        let service = Arc::downgrade(self);
        self.console.on(EVENT_PERSISTENT_DATA, move |_, params| {
            let Some(service) = service.upgrade() else {
                return;
            };
            if let Some(data) = params.get("data") {
                service.merge_last_visits(data);
            }
        })?;

        self.publish_roster()
    }

    /// Add a newly connected controller to the roster.
    ///
    /// Returns `Ok(None)` when the device is already present. Requests the
    /// player's persistent data and republishes the roster on success.
    pub fn add_player(&self, device_id: DeviceId) -> Result<Option<Player>, ServiceError> {
        {
            let roster = self.lock();
            if roster.contains_key(&device_id) {
                return Ok(None);
            }
        }

        let snapshot = self.console.device_snapshot(Some(device_id));
        let color = self
            .colors
            .get(device_id.0 as usize)
            .or_else(|| self.colors.first())
            .cloned()
            .unwrap_or_else(|| "#ffffff".to_string());

        // Joining mid-round means sitting out until the next one.
        let active_round = !matches!(
            self.console.screen_custom_data(CURRENT_STATE_KEY),
            Some(Value::String(state)) if state == "ingame"
        );

        let player = Player {
            uid: snapshot.uid.clone(),
            device_id,
            name: snapshot.name,
            picture: snapshot.picture,
            is_master: snapshot.is_master,
            is_premium: snapshot.is_premium,
            color,
            score: 0,
            answers: IndexMap::new(),
            active_round,
            last_visit_ts: None,
        };

        self.lock().insert(device_id, player.clone());

        if let Some(uid) = snapshot.uid {
            self.console.request_persistent_data(&[uid])?;
        }
        self.publish_roster()?;
        Ok(Some(player))
    }

    /// Drop a departed controller from the roster and republish it.
    pub fn remove_player(&self, device_id: DeviceId) -> Result<Player, ServiceError> {
        let removed = self.lock().shift_remove(&device_id).ok_or_else(|| {
            ServiceError::NotFound(format!("no player with device id {device_id}"))
        })?;
        self.publish_roster()?;
        Ok(removed)
    }

    /// The player holding `device_id`, if any.
    pub fn player(&self, device_id: DeviceId) -> Option<Player> {
        self.lock().get(&device_id).cloned()
    }

    /// All players in join order.
    pub fn players(&self) -> Vec<Player> {
        self.lock().values().cloned().collect()
    }

    /// Number of players currently in the roster.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Add points to one player's score, returning the new total.
    pub fn add_score(&self, device_id: DeviceId, points: i64) -> Result<i64, ServiceError> {
        let mut roster = self.lock();
        let player = roster.get_mut(&device_id).ok_or_else(|| {
            ServiceError::NotFound(format!("no player with device id {device_id}"))
        })?;
        player.score += points;
        Ok(player.score)
    }

    /// Count an answer for one player against a question uid.
    pub fn record_answer(
        &self,
        device_id: DeviceId,
        question_uid: &str,
        correct: bool,
    ) -> Result<(), ServiceError> {
        let mut roster = self.lock();
        let player = roster.get_mut(&device_id).ok_or_else(|| {
            ServiceError::NotFound(format!("no player with device id {device_id}"))
        })?;
        let stats = player.answers.entry(question_uid.to_string()).or_default();
        stats.total += 1;
        if correct {
            stats.correct += 1;
        }
        Ok(())
    }

    /// Store the current timestamp as every player's last visit.
    pub fn save_last_visit(&self) -> Result<(), ServiceError> {
        let now = unix_ms_now();
        let uids: Vec<String> = self.lock().values().filter_map(|p| p.uid.clone()).collect();
        for uid in uids {
            self.console
                .store_persistent_data(STORAGE_LAST_VISIT_KEY, json!(now), &uid)?;
        }
        Ok(())
    }

    /// The most recent previous visit across all players, once loaded.
    pub fn last_visit(&self) -> Option<i64> {
        self.lock().values().filter_map(|p| p.last_visit_ts).max()
    }

    fn apply_profile_change(&self, sender: DeviceId, params: &Value) {
        let Some(device_id) = device_id_param(params) else {
            return;
        };
        let updated = {
            let mut roster = self.lock();
            let Some(player) = roster.get_mut(&device_id) else {
                return;
            };
            if let Some(name) = params.get("name").and_then(Value::as_str) {
                player.name = name.to_string();
            }
            player.picture = params
                .get("picture")
                .and_then(Value::as_str)
                .map(str::to_string);
            player.clone()
        };

        if let Err(err) = self.publish_roster() {
            warn!(%device_id, error = %err, "failed to republish roster");
        }
        match serde_json::to_value(&updated) {
            Ok(record) => self.console.dispatch_local(
                sender,
                &EventEnvelope::new(
                    EVENT_PLAYER_PROFILE_CHANGED,
                    json!({ "device_id": device_id, "player": record }),
                ),
            ),
            Err(err) => warn!(%device_id, error = %err, "failed to serialize player"),
        }
    }

    fn merge_last_visits(&self, data: &Value) {
        let mut roster = self.lock();
        for player in roster.values_mut() {
            let Some(uid) = player.uid.as_deref() else {
                continue;
            };
            if let Some(ts) = data
                .get(uid)
                .and_then(|stored| stored.get(STORAGE_LAST_VISIT_KEY))
                .and_then(Value::as_i64)
            {
                player.last_visit_ts = Some(ts);
            }
        }
    }

    /// Publish the full roster through the screen's custom state.
    fn publish_roster(&self) -> Result<(), ServiceError> {
        let roster = self.lock();
        let value = serde_json::to_value(&*roster)?;
        drop(roster);
        self.console.set_custom_property(ROSTER_STATE_KEY, value)
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<DeviceId, Player>> {
        self.roster
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Read a `device_id` field out of event params.
fn device_id_param(params: &Value) -> Option<DeviceId> {
    params
        .get("device_id")
        .and_then(Value::as_u64)
        .map(|id| DeviceId(id as u32))
}

fn unix_ms_now() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::console::{DriverEvent, testing::MockDriver};

    use super::*;

    fn screen_setup() -> (Arc<MockDriver>, Arc<ConsoleService>, Arc<PlayerService>) {
        let driver = Arc::new(MockDriver::screen());
        let console = Arc::new(ConsoleService::new(
            driver.clone() as Arc<dyn crate::console::ConsoleDriver>
        ));
        let colors = vec!["#f3a31d".to_string(), "#e54450".to_string()];
        let service = PlayerService::new(Arc::clone(&console), colors);
        service.attach().unwrap();
        (driver, console, service)
    }

    fn connect(console: &ConsoleService, device_id: DeviceId) {
        console.handle_driver_event(DriverEvent::Connect { device_id });
    }

    #[test]
    fn connect_adds_a_player_with_profile_and_color() {
        let (driver, console, service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));

        let player = service.player(DeviceId(1)).unwrap();
        assert_eq!(player.name, "Alice");
        assert_eq!(player.color, "#e54450");
        assert!(player.is_master);
        assert_eq!(player.score, 0);
    }

    #[test]
    fn duplicate_connect_is_ignored() {
        let (driver, console, service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));
        connect(&console, DeviceId(1));
        assert_eq!(service.len(), 1);
    }

    #[test]
    fn connect_publishes_roster_and_requests_persistent_data() {
        let (driver, console, _service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));

        let state = driver.custom_state_of(DeviceId::SCREEN);
        assert!(state["players"]["1"]["name"].as_str() == Some("Alice"));
        assert_eq!(driver.persistent_requests().len(), 1);
    }

    #[test]
    fn connect_emits_a_player_added_event() {
        let (driver, console, _service) = screen_setup();
        let added = Arc::new(AtomicUsize::new(0));
        {
            let added = Arc::clone(&added);
            console
                .on(EVENT_PLAYER_ADDED, move |_, params| {
                    assert_eq!(params["player"]["name"], "Alice");
                    added.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));
        assert_eq!(added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disconnect_removes_the_player_and_emits_removed() {
        let (driver, console, service) = screen_setup();
        let removed = Arc::new(AtomicUsize::new(0));
        {
            let removed = Arc::clone(&removed);
            console
                .on(EVENT_PLAYER_REMOVED, move |_, _| {
                    removed.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));
        console.handle_driver_event(DriverEvent::Disconnect {
            device_id: DeviceId(1),
        });

        assert!(service.is_empty());
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_an_unknown_device_is_a_not_found_error() {
        let (_driver, _console, service) = screen_setup();
        assert!(matches!(
            service.remove_player(DeviceId(9)),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn profile_change_updates_the_roster_entry() {
        let (driver, console, service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));

        driver.rename_device(DeviceId(1), "Alicia");
        console.handle_driver_event(DriverEvent::ProfileChange {
            device_id: DeviceId(1),
        });

        assert_eq!(service.player(DeviceId(1)).unwrap().name, "Alicia");
    }

    #[test]
    fn joining_mid_round_marks_the_player_inactive() {
        let (driver, console, service) = screen_setup();
        driver.seed_custom_state(DeviceId::SCREEN, serde_json::json!({"current_state": "ingame"}));
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));
        assert!(!service.player(DeviceId(1)).unwrap().active_round);
    }

    #[test]
    fn persistent_data_fills_in_last_visit() {
        let (driver, console, service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));
        let uid = service.player(DeviceId(1)).unwrap().uid.unwrap();

        console.handle_driver_event(DriverEvent::PersistentDataLoaded {
            data: serde_json::json!({ (uid.as_str()): { (STORAGE_LAST_VISIT_KEY): 1234 } }),
        });

        assert_eq!(service.last_visit(), Some(1234));
    }

    #[test]
    fn save_last_visit_writes_one_record_per_player() {
        let (driver, console, service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        driver.add_device(DeviceId(2), "Bob", false);
        connect(&console, DeviceId(1));
        connect(&console, DeviceId(2));

        service.save_last_visit().unwrap();
        assert_eq!(driver.persistent_writes().len(), 2);
    }

    #[test]
    fn scores_and_answers_accumulate() {
        let (driver, console, service) = screen_setup();
        driver.add_device(DeviceId(1), "Alice", false);
        connect(&console, DeviceId(1));

        assert_eq!(service.add_score(DeviceId(1), 10).unwrap(), 10);
        assert_eq!(service.add_score(DeviceId(1), -3).unwrap(), 7);
        service.record_answer(DeviceId(1), "q1", true).unwrap();
        service.record_answer(DeviceId(1), "q1", false).unwrap();

        let stats = service.player(DeviceId(1)).unwrap().answers["q1"];
        assert_eq!(stats, AnswerStats { total: 2, correct: 1 });
    }

    #[test]
    fn controllers_do_not_build_a_roster() {
        let driver = Arc::new(MockDriver::new(DeviceId(1)));
        let console = Arc::new(ConsoleService::new(
            driver.clone() as Arc<dyn crate::console::ConsoleDriver>
        ));
        let service = PlayerService::new(Arc::clone(&console), Vec::new());
        service.attach().unwrap();

        connect(&console, DeviceId(2));
        assert!(service.is_empty());
    }
}
