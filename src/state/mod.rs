//! Central application context wiring the services together.
//!
//! One [`AppState`] per device: it owns the console facade and every
//! domain service, installs their event subscriptions, and pumps the
//! transport's event channel into the facade. Services receive their
//! dependencies through this context; nothing here is global.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    config::AppConfig,
    console::{ConsoleDriver, ConsoleService, DriverEvent, EVENT_AD_SHOW},
    error::ServiceError,
    services::{
        high_scores::HighScoreService,
        players::PlayerService,
        properties::PropertyService,
        select::SelectService,
        sound::{SoundBackend, SoundService},
        view::ViewService,
    },
};

/// Cheaply cloneable handle to the application context.
pub type SharedState = Arc<AppState>;

/// Central application state owning the console facade and all services.
pub struct AppState {
    console: Arc<ConsoleService>,
    players: Arc<PlayerService>,
    select: Arc<SelectService>,
    view: Arc<ViewService>,
    sound: Arc<SoundService>,
    properties: Arc<PropertyService>,
    high_scores: Arc<HighScoreService>,
}

impl AppState {
    /// Build the context over a transport driver and a sound backend, and
    /// install every service's event subscriptions.
    pub fn new(
        config: &AppConfig,
        driver: Arc<dyn ConsoleDriver>,
        sound_backend: Arc<dyn SoundBackend>,
    ) -> Result<SharedState, ServiceError> {
        let console = Arc::new(ConsoleService::new(driver));
        let players = PlayerService::new(Arc::clone(&console), config.colors().to_vec());
        let select = SelectService::new(Arc::clone(&console));
        let view = ViewService::new(Arc::clone(&console));
        let sound = SoundService::new(sound_backend, config.sound_base_url());
        let properties = PropertyService::new(Arc::clone(&console));
        let high_scores = HighScoreService::new(Arc::clone(&console));

        players.attach()?;
        select.attach()?;
        view.attach()?;
        properties.attach()?;
        high_scores.attach()?;

        // Ad breaks take over the screen, so local audio goes quiet.
        {
            let sound = Arc::downgrade(&sound);
            console.on(EVENT_AD_SHOW, move |_, _| {
                if let Some(sound) = sound.upgrade() {
                    sound.stop_all();
                }
            })?;
        }

        Ok(Arc::new(Self {
            console,
            players,
            select,
            view,
            sound,
            properties,
            high_scores,
        }))
    }

    /// The console facade.
    pub fn console(&self) -> &Arc<ConsoleService> {
        &self.console
    }

    /// The player roster service.
    pub fn players(&self) -> &Arc<PlayerService> {
        &self.players
    }

    /// The selection-list service.
    pub fn select(&self) -> &Arc<SelectService> {
        &self.select
    }

    /// The view navigation service.
    pub fn view(&self) -> &Arc<ViewService> {
        &self.view
    }

    /// The sound playback service.
    pub fn sound(&self) -> &Arc<SoundService> {
        &self.sound
    }

    /// The custom-state property tracker.
    pub fn properties(&self) -> &Arc<PropertyService> {
        &self.properties
    }

    /// The leaderboard service.
    pub fn high_scores(&self) -> &Arc<HighScoreService> {
        &self.high_scores
    }

    /// Forward transport events into the facade until the channel closes.
    pub async fn pump(&self, mut events: mpsc::UnboundedReceiver<DriverEvent>) {
        while let Some(event) = events.recv().await {
            self.console.handle_driver_event(event);
        }
        debug!("transport event channel closed");
    }
}
