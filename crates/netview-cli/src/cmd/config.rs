//! Config commands: show, path, init.

use crate::ui;
use chrono::Utc;
use netview_kernel::config::{default_config_path, load_config, render_config};
use netview_types::config::NetConfig;
use std::path::{Path, PathBuf};

/// Rename the existing config.toml to a timestamped backup before writing a new one.
pub(crate) fn backup_existing_config(config_path: &Path) -> std::io::Result<Option<PathBuf>> {
    if !config_path.exists() {
        return Ok(None);
    }

    let file_name = config_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("config.toml");
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let backup_name = format!("{file_name}.backup-{timestamp}");
    let backup_path = config_path.with_file_name(&backup_name);

    std::fs::rename(config_path, &backup_path)?;
    Ok(Some(backup_path))
}

/// Resolve the config file path from the global `--config` flag.
pub(crate) fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path)
}

pub fn cmd_config_show(explicit: Option<PathBuf>) {
    let path = config_path(explicit.as_deref());
    let config = load_config(Some(&path));
    match render_config(&config) {
        Ok(rendered) => {
            println!("# {}\n", path.display());
            println!("{rendered}");
        }
        Err(e) => {
            ui::error(&format!("Cannot render config: {e}"));
            std::process::exit(1);
        }
    }
}

pub fn cmd_config_path(explicit: Option<PathBuf>) {
    println!("{}", config_path(explicit.as_deref()).display());
}

pub fn cmd_config_init(explicit: Option<PathBuf>, force: bool) {
    let path = config_path(explicit.as_deref());
    match write_default_config(&path, force) {
        Ok(backup) => {
            if let Some(backup) = backup {
                ui::kv("Backup", &backup.display().to_string());
            }
            ui::success(&format!("Wrote {}", path.display()));
            ui::hint("Set shared_secret before running `netview serve`");
        }
        Err(e) => {
            ui::error_with_fix(&e, "Pass --force to replace the existing file");
            std::process::exit(1);
        }
    }
}

/// Write `NetConfig::default()` to `path`, backing up any existing file when forced.
fn write_default_config(path: &Path, force: bool) -> Result<Option<PathBuf>, String> {
    if path.exists() && !force {
        return Err(format!("{} already exists", path.display()));
    }
    let rendered = render_config(&NetConfig::default()).map_err(|e| e.to_string())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    }
    let backup = backup_existing_config(path).map_err(|e| format!("backup failed: {e}"))?;
    std::fs::write(path, rendered).map_err(|e| format!("cannot write {}: {e}", path.display()))?;
    Ok(backup)
}
