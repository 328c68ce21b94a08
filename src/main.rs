//! Demo binary running a screen and two controllers over the loopback transport.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use serde_json::json;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use couch_console::{
    config::AppConfig,
    console::{
        ConsoleDriver,
        loopback::{LoopbackConsole, LoopbackHub},
    },
    services::{select::SelectMode, sound::NullSound},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let hub = LoopbackHub::new();

    let screen = spawn_context(&config, hub.attach_screen())?;
    settle().await;
    info!(url = %screen.console().connect_url()?, "screen is up");

    let alice = spawn_context(&config, hub.join("Alice"))?;
    let bob = spawn_context(&config, hub.join("Bob"))?;
    settle().await;

    let roster: Vec<String> = screen
        .players()
        .players()
        .into_iter()
        .map(|player| format!("{} ({})", player.name, player.color))
        .collect();
    info!(?roster, "lobby assembled");

    // Alice picks an answer on her controller; the screen sees the cursor.
    alice.select().define_list(
        "answer",
        vec![json!("yes"), json!("no"), json!("maybe")],
        SelectMode::Single,
    )?;
    alice.select().set_index("answer", 2)?;
    settle().await;
    info!(
        cursor = ?screen.select().device_cursor(alice.console().device_id(), "answer"),
        "alice answered"
    );

    // The screen sends everyone into the first round.
    screen.view().all_go("round/1", json!({ "round": 1 }), true)?;
    settle().await;
    info!(
        screen_view = ?screen.view().current(),
        bob_view = ?bob.view().current(),
        "round started"
    );

    screen.sound().load("intro", "intro.mp3");
    screen.sound().load("round", "round.mp3");
    screen.sound().play_queue(&["intro", "round"], false, false)?;

    if let Some(uid) = screen
        .console()
        .driver()
        .uid(alice.console().device_id())
    {
        screen
            .high_scores()
            .store("demo", 42, &uid, json!({}), Some("Alice".into()))?;
        screen.high_scores().load("demo", &[])?;
        settle().await;
        info!(rows = ?screen.high_scores().cached(), "leaderboard");
    }

    // Bob fixes his nickname, then heads out.
    let bob_id = bob.console().device_id();
    hub.rename(bob_id, "Robert");
    settle().await;
    info!(
        name = ?screen.players().player(bob_id).map(|p| p.name),
        "profile updated"
    );

    hub.leave(bob_id);
    settle().await;
    info!(players = screen.players().len(), "bob left");

    info!("demo running; press Ctrl+C to exit");
    shutdown_signal().await;
    Ok(())
}

/// Build one device context and pump its transport events in the background.
fn spawn_context(config: &AppConfig, driver: LoopbackConsole) -> anyhow::Result<SharedState> {
    let driver = Arc::new(driver);
    let events = driver
        .take_events()
        .context("event receiver already taken")?;
    let state = AppState::new(
        config,
        driver as Arc<dyn ConsoleDriver>,
        Arc::new(NullSound),
    )?;
    let pump_state = state.clone();
    tokio::spawn(async move { pump_state.pump(events).await });
    Ok(state)
}

/// Give the background pumps a moment to deliver queued events.
async fn settle() {
    sleep(Duration::from_millis(50)).await;
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the demo down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
