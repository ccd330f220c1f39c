// Configuration loader
// Loads settings from an explicit path, $GREEDY_SCHED_CONFIG, or
// ~/.greedy-sched/config.toml, falling back to defaults

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::constants::{CONFIG_DIR, CONFIG_ENV_VAR, CONFIG_FILE};
use super::settings::Config;

/// Resolve which config file to read.
///
/// An explicit path wins, then the environment variable, then the file in
/// the home directory if it exists. `None` means "use defaults".
pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let default = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    default.exists().then_some(default)
}

/// Load configuration
///
/// A path named explicitly or through the environment must exist; the
/// home-directory file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let Some(path) = config_path(explicit) else {
        debug!("No config file found, using defaults");
        return Ok(Config::default());
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = Config::from_toml_str(&contents)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;

    debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}
