//! Configuration loading for the push observer.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::ReconnectConfig;

/// File-level configuration. Every field may be overridden on the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// WebSocket URL of the dashboard push channel
    #[serde(default)]
    pub url: Option<String>,

    /// Spec whose task list is observed
    #[serde(default)]
    pub spec: Option<String>,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt (default: 5 seconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound on the delay between attempts (default: 60 seconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Give up after this many consecutive failures (default: never)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            max_attempts: None,
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl From<&ReconnectSettings> for ReconnectConfig {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_factor: settings.backoff_factor,
            max_attempts: settings.max_attempts,
        }
    }
}

/// Fully resolved settings the observer runs with.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub url: String,
    pub spec: String,
    pub reconnect: ReconnectConfig,
}

impl WatchConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: WatchConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load from `path` if given, otherwise start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides and check that required values are present.
    pub fn resolve(self, url: Option<String>, spec: Option<String>) -> Result<ResolvedConfig> {
        let Some(url) = url.or(self.url) else {
            bail!("No push channel URL given (use --url or set \"url\" in the config file)");
        };
        let Some(spec) = spec.or(self.spec) else {
            bail!("No spec given (use --spec or set \"spec\" in the config file)");
        };
        if self.reconnect.backoff_factor < 1.0 {
            bail!(
                "reconnect.backoff_factor must be at least 1.0, got {}",
                self.reconnect.backoff_factor
            );
        }

        Ok(ResolvedConfig {
            url,
            spec,
            reconnect: ReconnectConfig::from(&self.reconnect),
        })
    }
}
