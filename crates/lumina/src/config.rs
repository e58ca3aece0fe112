//! Runtime configuration for the price feed, retries, and polling.
//!
//! Load from: env `LUMINA_CONFIG_PATH`, or `./config/lumina.json`, or `./lumina.json`.
//! Every field is optional; missing or unreadable files yield defaults.

use crate::feed::PriceConfig;
use crate::poll::PollOptions;
use crate::retry::RetryOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub base_url: String,
    pub asset: String,
    pub vs_currency: String,
    pub fallback_price: f64,
}

impl Default for PriceSettings {
    fn default() -> Self {
        let d = PriceConfig::default();
        Self {
            base_url: d.base_url,
            asset: d.asset,
            vs_currency: d.vs_currency,
            fallback_price: d.fallback_price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let d = PriceConfig::default().retry;
        Self {
            max_attempts: d.max_attempts,
            delay_ms: d.delay.as_millis() as u64,
            backoff: d.backoff,
        }
    }
}

impl RetrySettings {
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions::default()
            .max_attempts(self.max_attempts)
            .delay(Duration::from_millis(self.delay_ms))
            .backoff(self.backoff)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_ms: u64,
    pub enabled: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        let d = PollOptions::default();
        Self {
            interval_ms: d.interval.as_millis() as u64,
            enabled: d.enabled,
        }
    }
}

impl PollSettings {
    pub fn to_options(&self) -> PollOptions {
        PollOptions::default()
            .interval(Duration::from_millis(self.interval_ms))
            .enabled(self.enabled)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuminaConfig {
    pub price: PriceSettings,
    pub retry: RetrySettings,
    pub poll: PollSettings,
}

impl LuminaConfig {
    /// Load config from path. Returns default on error or missing file.
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config, using defaults");
            Self::default()
        })
    }

    /// Load config: env LUMINA_CONFIG_PATH, then ./config/lumina.json, then ./lumina.json.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("LUMINA_CONFIG_PATH") {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
        }
        for candidate in [Path::new("./config/lumina.json"), Path::new("./lumina.json")] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Self::default()
    }

    pub fn price_config(&self, offline: bool) -> PriceConfig {
        PriceConfig {
            base_url: self.price.base_url.clone(),
            asset: self.price.asset.clone(),
            vs_currency: self.price.vs_currency.clone(),
            fallback_price: self.price.fallback_price,
            retry: self.retry.to_options(),
            offline,
        }
    }
}
