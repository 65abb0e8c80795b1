use serde::Deserialize;
use std::{error::Error, fs};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub log_level: String,
    /// Cadence of the unassigned-order watchdog, in seconds.
    pub watchdog_interval_secs: u64,
    /// Cadence of the scheduled-order initiator, in seconds.
    pub initiator_interval_secs: u64,
    /// Local hour (0-23) at which the materializer copies due templates.
    pub materializer_hour: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            watchdog_interval_secs: 10,
            initiator_interval_secs: 5,
            materializer_hour: 1,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        let config = serde_yml::from_str(&contents)?;

        Ok(config)
    }
}
