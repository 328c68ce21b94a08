//! Wire-facing data shapes: event envelopes, device identifiers, snapshots.

/// Device identifiers and per-device profile snapshots.
pub mod device;
/// The `{event_name, params}` envelope carried inside raw messages.
pub mod envelope;

pub use device::{DeviceId, DeviceSnapshot};
pub use envelope::EventEnvelope;
