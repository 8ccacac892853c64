mod job;
mod types;

pub use job::*;
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

    let default_paths = ["./renderforged.toml", "~/.config/renderforged/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {}", path.display());
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    let paths = &config.paths;

    if !paths.root.as_os_str().is_empty() && !paths.root.exists() {
        tracing::warn!("Root directory does not exist: {:?}", paths.root);
    }
    if !paths.scratch_dir.as_os_str().is_empty() && !paths.scratch_dir.exists() {
        tracing::warn!("Scratch directory does not exist: {:?}", paths.scratch_dir);
    }

    for name in [&paths.event, &paths.division] {
        if name.contains(['/', '\\']) {
            anyhow::bail!("Event and division names cannot contain path separators: {name:?}");
        }
    }

    if let Some(mlflow) = &config.telemetry.mlflow {
        if !(mlflow.uri.starts_with("http://") || mlflow.uri.starts_with("https://")) {
            anyhow::bail!("MLflow uri must be an http(s) URL: {}", mlflow.uri);
        }
        if mlflow.metric_batch_size == 0 {
            anyhow::bail!("MLflow metric_batch_size cannot be 0");
        }
    }

    Ok(())
}
