use serde_json::Value;

use crate::{dto::DeviceId, error::DriverError};

/// Lifecycle notifications a console transport delivers to the facade.
///
/// One variant per vendor callback; the facade translates each into a named
/// dispatcher event.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// The transport finished connecting and knows its connect code.
    Ready {
        /// Code players enter to join this console session.
        connect_code: String,
    },
    /// A device joined the session.
    Connect {
        /// The device that joined.
        device_id: DeviceId,
    },
    /// A device left the session.
    Disconnect {
        /// The device that left.
        device_id: DeviceId,
    },
    /// A raw message arrived from another device.
    Message {
        /// The sending device.
        from: DeviceId,
        /// Arbitrary JSON payload; event envelopes travel in here.
        payload: Value,
    },
    /// A device published new custom state.
    CustomStateChange {
        /// The device whose state changed.
        device_id: DeviceId,
        /// The full custom-state blob after the change.
        state: Value,
    },
    /// A device's profile (name, picture) changed.
    ProfileChange {
        /// The device whose profile changed.
        device_id: DeviceId,
    },
    /// A device was granted premium status.
    Premium {
        /// The device that became premium.
        device_id: DeviceId,
    },
    /// An advertisement is about to cover the screen.
    AdShow,
    /// The advertisement finished (or was skipped).
    AdComplete {
        /// Whether an ad was actually shown.
        ad_was_shown: bool,
    },
    /// Previously requested persistent data arrived.
    PersistentDataLoaded {
        /// Map of uid to stored key/value data.
        data: Value,
    },
    /// Previously requested high scores arrived.
    HighScores {
        /// Raw high-score rows as the transport reports them.
        scores: Value,
    },
}

/// The opaque vendor transport surface the facade is built on.
///
/// Implementations relay JSON payloads between one screen and its
/// controllers and answer profile queries. All delivery is best effort:
/// a device that disconnects before delivery simply misses the message.
pub trait ConsoleDriver: Send + Sync {
    /// The id of the device this driver instance runs on.
    fn device_id(&self) -> DeviceId;

    /// The controller currently designated as master, if any is connected.
    fn master_device_id(&self) -> Option<DeviceId>;

    /// Display name for a device.
    fn nickname(&self, device_id: DeviceId) -> String;

    /// Profile picture URL for a device, if one exists.
    fn profile_picture(&self, device_id: DeviceId) -> Option<String>;

    /// Stable per-user identifier for a device, if known.
    fn uid(&self, device_id: DeviceId) -> Option<String>;

    /// Whether a device has premium status.
    fn is_premium(&self, device_id: DeviceId) -> bool;

    /// Ids of all connected premium devices.
    fn premium_device_ids(&self) -> Vec<DeviceId>;

    /// Unicast a payload to one device.
    fn send(&self, to: DeviceId, payload: Value) -> Result<(), DriverError>;

    /// Broadcast a payload to every other connected device.
    fn broadcast(&self, payload: Value) -> Result<(), DriverError>;

    /// Read the published custom state of a device.
    fn custom_state(&self, device_id: DeviceId) -> Option<Value>;

    /// Replace this device's published custom state.
    fn set_custom_state(&self, state: Value) -> Result<(), DriverError>;

    /// Set one property inside this device's published custom state.
    fn set_custom_state_property(&self, key: &str, value: Value) -> Result<(), DriverError>;

    /// Ask the transport to load persistent data for the given uids.
    ///
    /// The result arrives later as [`DriverEvent::PersistentDataLoaded`].
    fn request_persistent_data(&self, uids: &[String]) -> Result<(), DriverError>;

    /// Store one key/value pair of persistent data for a uid.
    fn store_persistent_data(&self, key: &str, value: Value, uid: &str)
    -> Result<(), DriverError>;

    /// Submit a high score.
    fn store_high_score(
        &self,
        leaderboard: &str,
        version: &str,
        score: i64,
        uid: &str,
        data: Value,
        label: Option<String>,
    ) -> Result<(), DriverError>;

    /// Ask the transport for high scores; the result arrives later as
    /// [`DriverEvent::HighScores`].
    fn request_high_scores(
        &self,
        leaderboard: &str,
        version: &str,
        uids: &[String],
    ) -> Result<(), DriverError>;

    /// Request an advertisement break.
    fn show_ad(&self) -> Result<(), DriverError>;
}
