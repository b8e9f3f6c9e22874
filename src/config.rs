//! Controller configuration
//!
//! Settings come from an optional JSON file and are then overlaid with the
//! `COAX_JUMBO` and `COAX_FEATURES` environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coax::Feature;
use crate::device::FeatureOverride;
use crate::interface::JumboWriteStrategy;
use crate::terminal::TerminalOptions;

pub const JUMBO_WRITE_STRATEGY_VAR: &str = "COAX_JUMBO";
pub const FEATURE_OVERRIDES_VAR: &str = "COAX_FEATURES";

/// Controller configuration
///
/// Periods and timeouts are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Target time between POLLs while a terminal is attached
    pub attached_poll_period: f64,
    /// Target time between POLLs while looking for a terminal
    pub detached_poll_period: f64,
    /// Coax receive timeout
    pub receive_timeout: f64,
    pub extended_id_retry_attempts: usize,
    pub extended_id_retry_delay: f64,
    /// Unset lets the interface decide based on its firmware
    pub jumbo_write_strategy: Option<JumboWriteStrategy>,
    pub feature_overrides: Vec<FeatureOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            attached_poll_period: 0.1,
            detached_poll_period: 0.5,
            receive_timeout: 0.001,
            extended_id_retry_attempts: 3,
            extended_id_retry_delay: 0.25,
            jumbo_write_strategy: None,
            feature_overrides: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Overlay settings from the process environment
    pub fn apply_env(&mut self) {
        let jumbo_write_strategy = std::env::var(JUMBO_WRITE_STRATEGY_VAR).ok();
        let feature_overrides = std::env::var(FEATURE_OVERRIDES_VAR).ok();

        self.apply_env_vars(jumbo_write_strategy.as_deref(), feature_overrides.as_deref());
    }

    /// Overlay settings from `COAX_JUMBO` and `COAX_FEATURES` values
    pub fn apply_env_vars(&mut self, jumbo_write_strategy: Option<&str>, feature_overrides: Option<&str>) {
        if let Some(value) = jumbo_write_strategy {
            match value {
                "ignore" => self.jumbo_write_strategy = Some(JumboWriteStrategy::Ignore),
                _ => tracing::warn!("Unsupported {} option: {}", JUMBO_WRITE_STRATEGY_VAR, value),
            }
        }

        if let Some(value) = feature_overrides {
            for feature_override in parse_feature_overrides(value) {
                self.feature_overrides
                    .retain(|existing| existing.feature != feature_override.feature);

                self.feature_overrides.push(feature_override);
            }
        }
    }

    pub fn attached_poll_period(&self) -> Duration {
        seconds(self.attached_poll_period)
    }

    pub fn detached_poll_period(&self) -> Duration {
        seconds(self.detached_poll_period)
    }

    pub fn receive_timeout(&self) -> Duration {
        seconds(self.receive_timeout)
    }

    pub fn terminal_options(&self) -> TerminalOptions {
        TerminalOptions {
            extended_id_retry_attempts: self.extended_id_retry_attempts,
            extended_id_retry_delay: seconds(self.extended_id_retry_delay),
            feature_overrides: self.feature_overrides.clone(),
        }
    }
}

/// Parse `NAME@address[,NAME@address...]`, skipping invalid entries
pub fn parse_feature_overrides(value: &str) -> Vec<FeatureOverride> {
    value
        .split(',')
        .filter_map(|entry| {
            let feature_override = parse_feature_override(entry);

            if feature_override.is_none() {
                tracing::warn!("Invalid feature override: {}", entry);
            }

            feature_override
        })
        .collect()
}

fn parse_feature_override(entry: &str) -> Option<FeatureOverride> {
    let (name, address) = entry.split_once('@')?;

    Some(FeatureOverride {
        feature: Feature::from_name(name)?,
        address: address.parse().ok()?,
    })
}

/// Negative or non-finite values are treated as zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
