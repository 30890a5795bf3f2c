//! Client configuration management.
//!
//! The configuration holds the API base URL, the theme preference and the
//! auto-refresh settings. Defaults come from the environment (`API_URL`,
//! `DEFAULT_THEME`, `AUTO_REFRESH`, `REFRESH_INTERVAL`); the saved copy lives
//! in the storage boundary under `authportal-config` and is merged over them.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{Storage, CONFIG_KEY};

/// API base URL used when the environment names none
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Interval between periodic user-list refreshes (5 minutes)
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 300_000;

/// Environment keys checked for the API URL, in order
const API_URL_KEYS: [&str; 3] = ["API_URL", "VITE_API_URL", "REACT_APP_API_URL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(&self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(rename = "apiUrl")]
    pub api_url: String,
    pub theme: Theme,
    #[serde(rename = "autoRefresh")]
    pub auto_refresh: bool,
    /// Milliseconds between periodic refreshes
    #[serde(rename = "refreshInterval")]
    pub refresh_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    /// Defaults read from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults read through `lookup`. Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = API_URL_KEYS
            .iter()
            .find_map(|key| get(*key))
            .map(|url| normalize_api_url(&url))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let theme = match get("DEFAULT_THEME").as_deref().map(str::trim) {
            Some("dark") => Theme::Dark,
            _ => Theme::Light,
        };

        let auto_refresh = get("AUTO_REFRESH")
            .map(|v| v.trim() == "true")
            .unwrap_or(true);

        let refresh_interval = get("REFRESH_INTERVAL")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_MS);

        Self {
            api_url,
            theme,
            auto_refresh,
            refresh_interval,
        }
    }

    /// Load the saved configuration, falling back to defaults.
    ///
    /// A blob that fails to parse is logged and ignored, the same as no blob.
    pub fn load(storage: &dyn Storage) -> Result<Self> {
        Self::load_with_defaults(storage, Self::default())
    }

    pub fn load_with_defaults(storage: &dyn Storage, defaults: Config) -> Result<Self> {
        let Some(saved) = storage.get(CONFIG_KEY)? else {
            return Ok(defaults);
        };

        let mut merged = match serde_json::to_value(&defaults) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize default config");
                return Ok(defaults);
            }
        };

        match serde_json::from_str::<serde_json::Value>(&saved) {
            Ok(serde_json::Value::Object(overrides)) => {
                if let Some(base) = merged.as_object_mut() {
                    base.extend(overrides);
                }
            }
            Ok(_) | Err(_) => {
                warn!("Failed to parse saved config, using defaults");
                return Ok(defaults);
            }
        }

        match serde_json::from_value(merged) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!(error = %e, "Saved config has invalid values, using defaults");
                Ok(defaults)
            }
        }
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let contents = serde_json::to_string(self)?;
        storage.set(CONFIG_KEY, &contents)
    }

    /// Remove the saved blob; the caller switches back to defaults
    pub fn reset(storage: &dyn Storage) -> Result<()> {
        storage.remove(CONFIG_KEY)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_interval)
    }
}

/// Trim whitespace and trailing slashes so paths can be appended directly
pub fn normalize_api_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
