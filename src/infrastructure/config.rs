use crate::domain::planner::PlannerSettings;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const APP_JSON: &str = "app.json";
const SUPPORTED_SCHEMA: u64 = 1;
const MIN_TICK_INTERVAL_MS: u64 = 10;
const MAX_TICK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogStoreBackend {
    #[default]
    Local,
    Rest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LogStoreSettings {
    pub backend: LogStoreBackend,
    pub endpoint: Option<String>,
    pub table: String,
}

impl Default for LogStoreSettings {
    fn default() -> Self {
        Self {
            backend: LogStoreBackend::Local,
            endpoint: None,
            table: "daily_log".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffSettings {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub schema: u8,
    pub timezone: String,
    pub owner_id: String,
    pub tick_interval_ms: u64,
    pub planner: PlannerSettings,
    pub log_store: LogStoreSettings,
    pub handoff: HandoffSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            timezone: "UTC".to_string(),
            owner_id: "local".to_string(),
            tick_interval_ms: 100,
            planner: PlannerSettings::default(),
            log_store: LogStoreSettings::default(),
            handoff: HandoffSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.owner_id.trim().is_empty() {
            return Err("ownerId must not be empty".to_string());
        }
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&self.tick_interval_ms) {
            return Err(format!(
                "tickIntervalMs must be within {MIN_TICK_INTERVAL_MS}..={MAX_TICK_INTERVAL_MS}"
            ));
        }
        self.time_zone()?;
        self.planner.validate()?;
        if self.log_store.table.trim().is_empty() {
            return Err("logStore.table must not be empty".to_string());
        }
        if self.log_store.backend == LogStoreBackend::Rest
            && self
                .log_store
                .endpoint
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err("logStore.endpoint is required for the rest backend".to_string());
        }
        if self.handoff.max_attempts == 0 {
            return Err("handoff.maxAttempts must be >= 1".to_string());
        }
        Ok(())
    }

    pub fn time_zone(&self) -> Result<Tz, String> {
        self.timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| format!("timezone '{}' is not a known IANA zone", self.timezone))
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let config: AppConfig = serde_json::from_value(read_config(&path)?)?;
    config
        .validate()
        .map_err(|error| InfraError::InvalidConfig(format!("{error} ({})", path.display())))?;
    Ok(config)
}
