//! `planloop config`: Show configuration.

use std::path::PathBuf;

use planloop_config::AppConfig;

pub fn show(path: Option<PathBuf>, default_toml: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default_toml {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let path = super::config_path(path);
    let config =
        AppConfig::load_with_env(&path).map_err(|e| format!("Failed to load config: {e}"))?;

    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.has_api_key() {
        config.backend.api_key = Some("[REDACTED]".into());
    }
    config
}
