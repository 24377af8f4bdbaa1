use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::animator::PresenceTiming;

fn default_true() -> bool {
    true
}

fn default_log_cap() -> usize {
    1000
}

fn default_timeout_secs() -> u64 {
    8
}

fn default_reply_delay_ms() -> u64 {
    500
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Remote fallback endpoint; `None` disables the remote path.
    pub fallback_url: Option<String>,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub fallback_timeout_secs: u64,
    #[serde(default = "default_log_cap")]
    pub log_cap: usize,
    /// Pause before a canned answer is shown, in milliseconds.
    #[serde(default = "default_reply_delay_ms")]
    pub reply_delay_ms: u64,
    /// Path to a JSON knowledge base replacing the built-in one.
    #[serde(default)]
    pub knowledge_file: Option<PathBuf>,
    #[serde(default)]
    pub presence: PresenceConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PresenceConfig {
    pub effect_delay_min_secs: u64,
    pub effect_delay_max_secs: u64,
    pub effect_duration_secs: u64,
    pub bubble_delay_min_secs: u64,
    pub bubble_delay_max_secs: u64,
    pub bubble_duration_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        let t = PresenceTiming::default();
        Self {
            effect_delay_min_secs: t.effect_delay_min.as_secs(),
            effect_delay_max_secs: t.effect_delay_max.as_secs(),
            effect_duration_secs: t.effect_duration.as_secs(),
            bubble_delay_min_secs: t.bubble_delay_min.as_secs(),
            bubble_delay_max_secs: t.bubble_delay_max.as_secs(),
            bubble_duration_secs: t.bubble_duration.as_secs(),
        }
    }
}

impl PresenceConfig {
    pub fn timing(&self) -> PresenceTiming {
        PresenceTiming {
            effect_delay_min: Duration::from_secs(self.effect_delay_min_secs),
            effect_delay_max: Duration::from_secs(self.effect_delay_max_secs),
            effect_duration: Duration::from_secs(self.effect_duration_secs),
            bubble_delay_min: Duration::from_secs(self.bubble_delay_min_secs),
            bubble_delay_max: Duration::from_secs(self.bubble_delay_max_secs),
            bubble_duration: Duration::from_secs(self.bubble_duration_secs),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fallback_url: None,
            fallback_enabled: true,
            fallback_timeout_secs: default_timeout_secs(),
            log_cap: default_log_cap(),
            reply_delay_ms: default_reply_delay_ms(),
            knowledge_file: None,
            presence: PresenceConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs(self.fallback_timeout_secs)
    }

    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.reply_delay_ms)
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("coursebot").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{"fallback_url": null}"#).unwrap();
        assert!(config.fallback_enabled);
        assert_eq!(config.log_cap, 1000);
        assert_eq!(config.fallback_timeout(), Duration::from_secs(8));
        assert_eq!(config.reply_delay(), Duration::from_millis(500));
    }

    #[test]
    fn presence_config_converts_to_timing() {
        let presence = PresenceConfig {
            effect_delay_min_secs: 1,
            effect_delay_max_secs: 2,
            ..PresenceConfig::default()
        };
        let timing = presence.timing();
        assert_eq!(timing.effect_delay_min, Duration::from_secs(1));
        assert_eq!(timing.effect_delay_max, Duration::from_secs(2));
    }
}
