//! Application-level configuration loading: prompt catalog and game tunables.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    dao::room::DEFAULT_UPDATE_ATTEMPTS,
    session::{
        SessionSettings,
        catalog::{Prompt, PromptCatalog},
        rules::DEFAULT_WIN_THRESHOLD,
    },
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "WYR_BACK_CONFIG_PATH";

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_SESSION_IDLE_TTL_SECS: u64 = 300;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Prompts played in order.
    pub catalog: PromptCatalog,
    /// Combined score needed on the last round to win.
    pub win_threshold: u32,
    /// Compare-and-swap attempts per room update.
    pub update_attempts: u32,
    /// Session-level retries for transient failures.
    pub retry_attempts: u32,
    /// First retry delay.
    pub retry_base_delay: Duration,
    /// Poll period of backends without push notifications.
    pub poll_interval: Duration,
    /// How long a session without stream subscribers survives between requests.
    pub session_idle_ttl: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        prompts = app_config.catalog.len(),
                        win_threshold = app_config.win_threshold,
                        "loaded game configuration"
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

    /// Parse a JSON document; absent keys keep their defaults.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        raw.try_into()
    }

    /// Settings handed to every room session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            catalog: self.catalog.clone(),
            win_threshold: self.win_threshold,
            retry_attempts: self.retry_attempts,
            retry_base_delay: self.retry_base_delay,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: PromptCatalog::default(),
            win_threshold: DEFAULT_WIN_THRESHOLD,
            update_attempts: DEFAULT_UPDATE_ATTEMPTS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            session_idle_ttl: Duration::from_secs(DEFAULT_SESSION_IDLE_TTL_SECS),
        }
    }
}

/// Why a configuration document was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Catalog(#[from] crate::session::catalog::CatalogError),
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    prompts: Option<Vec<RawPrompt>>,
    win_threshold: Option<u32>,
    update_attempts: Option<u32>,
    retry_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    session_idle_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single prompt.
struct RawPrompt {
    first: String,
    second: String,
}

impl TryFrom<RawConfig> for AppConfig {
    type Error = ConfigError;

    fn try_from(value: RawConfig) -> Result<Self, Self::Error> {
        let defaults = Self::default();
        let catalog = match value.prompts {
            Some(prompts) => PromptCatalog::new(
                prompts
                    .into_iter()
                    .map(|raw| Prompt::new(raw.first, raw.second))
                    .collect(),
            )?,
            None => defaults.catalog,
        };

        let positive = |value: Option<u32>, default: u32, name: &'static str| match value {
            Some(0) => Err(ConfigError::Zero(name)),
            Some(value) => Ok(value),
            None => Ok(default),
        };

        Ok(Self {
            catalog,
            win_threshold: value.win_threshold.unwrap_or(defaults.win_threshold),
            update_attempts: positive(
                value.update_attempts,
                defaults.update_attempts,
                "update_attempts",
            )?,
            retry_attempts: positive(
                value.retry_attempts,
                defaults.retry_attempts,
                "retry_attempts",
            )?,
            retry_base_delay: value
                .retry_base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            poll_interval: match value.poll_interval_ms {
                Some(0) => return Err(ConfigError::Zero("poll_interval_ms")),
                Some(ms) => Duration::from_millis(ms),
                None => defaults.poll_interval,
            },
            session_idle_ttl: match value.session_idle_ttl_secs {
                Some(0) => return Err(ConfigError::Zero("session_idle_ttl_secs")),
                Some(secs) => Duration::from_secs(secs),
                None => defaults.session_idle_ttl,
            },
        })
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
