use anyhow::{Context, Result};
use hl_core::LabelingConfig;
use std::path::Path;
use tracing::{info, warn};

/// Loads the labeling configuration, falling back to defaults when `path`
/// does not exist, then applies command-line overrides and validates.
pub fn load(path: &Path, fps: Option<u32>) -> Result<LabelingConfig> {
    let mut config = if path.exists() {
        info!("Loading configuration from: {}", path.display());
        LabelingConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?
    } else {
        warn!("Config file {} not found, using defaults", path.display());
        LabelingConfig::default()
    };

    if let Some(fps) = fps {
        config.output.fps = fps;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
