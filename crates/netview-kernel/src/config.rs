//! Configuration loading from `~/.netview/config.toml` with defaults.

use crate::error::{KernelError, KernelResult};
use netview_types::config::NetConfig;
use netview_types::error::NetViewError;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load configuration from a TOML file, falling back to defaults.
///
/// A missing, unreadable or invalid file is logged and replaced by
/// [`NetConfig::default`].
pub fn load_config(path: Option<&Path>) -> NetConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return NetConfig::default();
    }

    match read_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to load config, using defaults"
            );
            NetConfig::default()
        }
    }
}

/// Read and validate a config file, reporting any problem.
pub fn read_config(path: &Path) -> KernelResult<NetConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| NetViewError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: NetConfig = toml::from_str(&contents)
        .map_err(|e| NetViewError::Config(format!("cannot parse {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Render a configuration as TOML.
pub fn render_config(config: &NetConfig) -> KernelResult<String> {
    toml::to_string_pretty(config)
        .map_err(|e| KernelError::NetView(NetViewError::Serialization(e.to_string())))
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    netview_home().join("config.toml")
}

/// Get the default NetView home directory.
pub fn netview_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".netview")
}
