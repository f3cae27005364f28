//! TOML-based application configuration.
//!
//! Stores:
//! - Backend endpoint and credentials
//! - Retry policy for backend calls
//! - Plan validation limits
//! - Pause penalty and default pause length
//! - Record amounts and fallback title
//!
//! Configuration is stored at `~/.config/focusone/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::data_dir;
use crate::error::ConfigError;
use crate::outbox::RetryPolicy;
use crate::plan::ValidationRules;
use crate::record::RecordSettings;

/// Backend service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_project_tag")]
    pub project_tag: String,
    /// Bearer token. `FOCUSONE_TOKEN` is used when unset.
    #[serde(default)]
    pub token: Option<String>,
}

/// Bounded retry for backend calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles on each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlansConfig {
    #[serde(default = "default_min_duration_min")]
    pub min_duration_min: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseConfig {
    /// Currency deducted per pause.
    #[serde(default = "default_penalty")]
    pub penalty: i64,
    #[serde(default = "default_pause_duration_min")]
    pub default_duration_min: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordConfig {
    #[serde(default)]
    pub bet_amount: i64,
    /// Title used for records of unnamed plans.
    #[serde(default = "default_once_title")]
    pub once_title: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/focusone/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub plans: PlansConfig,
    #[serde(default)]
    pub pause: PauseConfig,
    #[serde(default)]
    pub record: RecordConfig,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8849".into()
}
fn default_timeout_secs() -> u64 {
    6
}
fn default_project_tag() -> String {
    "focusone".into()
}
fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_min_duration_min() -> u16 {
    crate::plan::ValidationRules::default().min_duration_min
}
fn default_penalty() -> i64 {
    1
}
fn default_pause_duration_min() -> u32 {
    3
}
fn default_once_title() -> String {
    "One-off focus".into()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            project_tag: default_project_tag(),
            token: None,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self {
            min_duration_min: default_min_duration_min(),
        }
    }
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self {
            penalty: default_penalty(),
            default_duration_min: default_pause_duration_min(),
        }
    }
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            bet_amount: 0,
            once_title: default_once_title(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(root: &mut Value, key: &str, value: &str) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }

            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;

            let new_value = match existing {
                Value::Bool(_) => Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                Value::Number(_) => {
                    if let Ok(n) = value.parse::<u64>() {
                        Value::Number(n.into())
                    } else if let Ok(n) = value.parse::<i64>() {
                        Value::Number(n.into())
                    } else {
                        return Err(invalid(format!("cannot parse '{value}' as integer")));
                    }
                }
                Value::Object(_) => return Err(unknown()),
                // strings and unset optionals
                _ => Value::String(value.into()),
            };

            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    fn collect_entries(prefix: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    let key = if prefix.is_empty() {
                        k.clone()
                    } else {
                        format!("{prefix}.{k}")
                    };
                    Self::collect_entries(&key, v, out);
                }
            }
            Value::String(s) => out.push((prefix.to_string(), s.clone())),
            other => out.push((prefix.to_string(), other.to_string())),
        }
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        match Self::get_json_value_by_path(&json, key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key, coercing to the existing field's type.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value cannot be parsed.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Every leaf as `(dot.path, value)`, in key order.
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            Self::collect_entries("", &json, &mut out);
        }
        out
    }

    pub fn validation_rules(&self) -> ValidationRules {
        ValidationRules {
            min_duration_min: self.plans.min_duration_min,
        }
    }

    pub fn record_settings(&self) -> RecordSettings {
        RecordSettings {
            pause_penalty: self.pause.penalty,
            bet_amount: self.record.bet_amount,
            once_title: self.record.once_title.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }
}
