mod config;
mod database;

pub use config::{BackendConfig, Config, PauseConfig, PlansConfig, RecordConfig, RetryConfig};
pub use database::Database;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Selects the data directory flavour; `dev` uses a separate directory.
pub const ENV_VAR: &str = "FOCUSONE_ENV";

/// Returns `~/.config/focusone[-dev]/` based on FOCUSONE_ENV.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("focusone-dev")
    } else {
        base_dir.join("focusone")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
