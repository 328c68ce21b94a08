//! Application-level configuration loading, including the player color palette.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the JSON configuration is looked up.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COUCH_CONSOLE_CONFIG_PATH";
/// Default URL prefix for sound files.
const DEFAULT_SOUND_BASE_URL: &str = "assets/sounds/";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    colors: Vec<String>,
    sound_base_url: String,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to baked-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        colors = app_config.colors.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// The hex color palette players are assigned from.
    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    /// URL prefix prepended to every sound file.
    pub fn sound_base_url(&self) -> &str {
        &self.sound_base_url
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            colors: default_colors(),
            sound_base_url: DEFAULT_SOUND_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    colors: Option<Vec<String>>,
    sound_base_url: Option<String>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            colors: value.colors.unwrap_or_else(default_colors),
            sound_base_url: value
                .sound_base_url
                .unwrap_or_else(|| DEFAULT_SOUND_BASE_URL.to_string()),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in color palette shipped with the binary.
fn default_colors() -> Vec<String> {
    [
        "#f3a31d", "#e54450", "#774e9a", "#774e9a", "#6bc245", "#ecdefa", "#ffed1b", "#1a9567",
        "#77bbff", "#ff9900", "#99ee00", "#f4359e", "#651067", "#b82e2e", "#329262", "#9c5935",
        "#3b3eee", "#fb9a99", "#ccbb22", "#cab2d6", "#aaffaa", "#b91383", "#008800", "#660000",
        "#ff0000", "#ffff00", "#00ff00", "#0000ff", "#743411", "#111177", "#b77322", "#66aa00",
        "#00aac6", "#a9c413", "#9e8400", "#5574a6", "#777777", "#999999", "#bbbbbb", "#eeeeee",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
