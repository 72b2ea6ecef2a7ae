mod config;
pub mod database;
pub mod store;

pub use config::Config;
pub use database::Database;
pub use store::{EngineStore, MemoryStore};

use std::path::PathBuf;

/// Returns `~/.config/screenstake[-dev]/` based on SCREENSTAKE_ENV.
///
/// Set SCREENSTAKE_ENV=dev to use the development data directory, or
/// SCREENSTAKE_DATA_DIR to point somewhere else entirely (tests).
///
/// # Errors
/// Returns an error if the home directory cannot be determined or if
/// creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(dir) = std::env::var("SCREENSTAKE_DATA_DIR") {
        let dir = PathBuf::from(dir);
        std::fs::create_dir_all(&dir)?;
        return Ok(dir);
    }

    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("SCREENSTAKE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("screenstake-dev")
    } else {
        base_dir.join("screenstake")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
