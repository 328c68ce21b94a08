/// Versioned high-score store/load and the loaded-scores event.
pub mod high_scores;
/// Screen-side player roster over connect/disconnect events.
pub mod players;
/// Custom-state property trackers.
pub mod properties;
/// Cross-device selection lists.
pub mod select;
/// Sound playback orchestration behind a backend trait.
pub mod sound;
/// View navigation fan-out between screen and controllers.
pub mod view;
