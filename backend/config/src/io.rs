//! Config file loading.

use crate::schema::RuntimeConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "runtime.yaml";

/// Resolve the runtime config directory.
/// Priority: `PACKRT_CONFIG_DIR` env > `<platform config dir>/packrt` > `./.packrt`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PACKRT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|base| base.join("packrt"))
        .unwrap_or_else(|| PathBuf::from(".packrt"))
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk.
///
/// `.json` files are parsed as JSON, everything else as YAML. A missing file
/// yields the default config.
pub async fn load_config(path: &Path) -> Result<RuntimeConfig> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "config file does not exist; using defaults");
        return Ok(RuntimeConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config: RuntimeConfig = if is_json {
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config JSON at: {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config YAML at: {}", path.display()))?
    };

    info!(path = %path.display(), "loaded config");
    Ok(config)
}
