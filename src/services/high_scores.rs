//! Versioned high-score store/load and the loaded-scores event.
//!
//! Thin wrapper over the transport's leaderboard primitives. Scores are
//! written under a fixed format version so future format changes start a
//! fresh board. Loaded rows are cached and re-announced locally as a
//! `highscores.loaded` event.

use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

use crate::{
    console::{ConsoleService, EVENT_HIGH_SCORES},
    dto::EventEnvelope,
    error::ServiceError,
};

/// Format version written with every score.
pub const SCORE_VERSION: &str = "1.0";

/// High-score rows arrived; params carry the raw rows.
pub const EVENT_HIGH_SCORES_LOADED: &str = "highscores.loaded";

/// Leaderboard access for the local device.
pub struct HighScoreService {
    console: Arc<ConsoleService>,
    cache: Mutex<Option<Value>>,
}

impl HighScoreService {
    /// Create the service with an empty cache.
    pub fn new(console: Arc<ConsoleService>) -> Arc<Self> {
        Arc::new(Self {
            console,
            cache: Mutex::new(None),
        })
    }

    /// Cache inbound rows and re-announce them locally.
    pub fn attach(self: &Arc<Self>) -> Result<(), ServiceError> {
        let service: Weak<Self> = Arc::downgrade(self);
        self.console.on(EVENT_HIGH_SCORES, move |sender, rows| {
            let Some(service) = service.upgrade() else {
                return;
            };
            *service
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(rows.clone());
            service.console.dispatch_local(
                sender,
                &EventEnvelope::new(EVENT_HIGH_SCORES_LOADED, rows.clone()),
            );
        })?;
        Ok(())
    }

    /// Submit a score to a leaderboard under the current format version.
    pub fn store(
        &self,
        leaderboard: &str,
        score: i64,
        uid: &str,
        data: Value,
        label: Option<String>,
    ) -> Result<(), ServiceError> {
        self.console
            .driver()
            .store_high_score(leaderboard, SCORE_VERSION, score, uid, data, label)?;
        Ok(())
    }

    /// Request the rows of a leaderboard for the given uids.
    ///
    /// Rows arrive asynchronously through [`EVENT_HIGH_SCORES_LOADED`].
    pub fn load(&self, leaderboard: &str, uids: &[String]) -> Result<(), ServiceError> {
        self.console
            .driver()
            .request_high_scores(leaderboard, SCORE_VERSION, uids)?;
        Ok(())
    }

    /// The most recently loaded rows, if any arrived yet.
    pub fn cached(&self) -> Option<Value> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::console::{ConsoleDriver, DriverEvent, testing::MockDriver};

    use super::*;

    fn setup() -> (Arc<MockDriver>, Arc<ConsoleService>, Arc<HighScoreService>) {
        let driver = Arc::new(MockDriver::screen());
        let console = Arc::new(ConsoleService::new(driver.clone() as Arc<dyn ConsoleDriver>));
        let service = HighScoreService::new(Arc::clone(&console));
        service.attach().unwrap();
        (driver, console, service)
    }

    #[test]
    fn store_writes_under_the_current_version() {
        let (driver, _console, service) = setup();
        service
            .store("quiz", 42, "uid-1", json!({}), None)
            .unwrap();
        assert_eq!(
            driver.high_score_writes(),
            vec![("quiz".to_string(), SCORE_VERSION.to_string(), 42)]
        );
    }

    #[test]
    fn inbound_rows_are_cached_and_reannounced() {
        let (_driver, console, service) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            console
                .on(EVENT_HIGH_SCORES_LOADED, move |_, rows| {
                    seen.lock().unwrap().push(rows.clone());
                })
                .unwrap();
        }

        let rows = json!([{"uid": "uid-1", "score": 42}]);
        console.handle_driver_event(DriverEvent::HighScores {
            scores: rows.clone(),
        });

        assert_eq!(service.cached(), Some(rows.clone()));
        assert_eq!(seen.lock().unwrap().as_slice(), &[rows]);
    }

    #[test]
    fn cache_starts_empty() {
        let (_driver, _console, service) = setup();
        assert_eq!(service.cached(), None);
    }
}
