use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Identifier of one connected participant endpoint.
///
/// The shared display is always device `0`; controllers get increasing
/// numbers as they join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The shared screen display.
    pub const SCREEN: DeviceId = DeviceId(0);

    /// Whether this id addresses the screen.
    pub fn is_screen(&self) -> bool {
        *self == Self::SCREEN
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for DeviceId {
    fn from(value: u32) -> Self {
        DeviceId(value)
    }
}

/// Profile snapshot for one device, assembled from several driver queries.
///
/// This is a pure read with no caching; every call reflects the driver's
/// current answers.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Stable per-user identifier, if the driver knows one.
    pub uid: Option<String>,
    /// The device this snapshot describes.
    pub device_id: DeviceId,
    /// Display name reported by the device profile.
    pub name: String,
    /// Profile picture URL, if any.
    pub picture: Option<String>,
    /// True when this device is the designated master controller.
    pub is_master: bool,
    /// True when this device has premium status.
    pub is_premium: bool,
}
