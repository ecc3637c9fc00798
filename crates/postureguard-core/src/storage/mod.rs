mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, PostureSection, SessionSection};
pub use database::{Database, PostureTotal, SessionSummary, Stats};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/postureguard[-dev]/` based on POSTUREGUARD_ENV.
///
/// Set POSTUREGUARD_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("POSTUREGUARD_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("postureguard-dev")
    } else {
        base_dir.join("postureguard")
    };

    std::fs::create_dir_all(&dir).map_err(|source| ConfigError::DataDir {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}
