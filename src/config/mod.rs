mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./recmux.toml", "~/.config/recmux/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.muxer.fragment_duration_secs == 0 {
        anyhow::bail!("Fragment duration cannot be 0");
    }

    if config.encoder.batch_size == 0 {
        anyhow::bail!("Encoder batch size cannot be 0");
    }

    if config.encoder.channel_capacity == 0 {
        anyhow::bail!("Encoder channel capacity cannot be 0");
    }

    if let Some(ref filter) = config.logging.filter {
        if filter.trim().is_empty() {
            anyhow::bail!("Logging filter cannot be empty");
        }
    }

    Ok(())
}
