pub mod config_cmd;
pub mod roles;
pub mod run;

use std::path::PathBuf;

use planloop_config::AppConfig;

/// `--config` if given, else the default location.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| AppConfig::config_dir().join("config.toml"))
}
