//! `packrt-config`: package runtime configuration.
//!
//! Provides:
//! - Typed config schema with accessor fallbacks
//! - YAML/JSON loading
//! - `${ENV_VAR}` substitution
//! - Default value application
//! - Validation with errors and warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{collect_referenced_vars, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config};
pub use schema::{LoggingConfig, NativeConfig, RuntimeConfig, ScriptsConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

/// Load a config file, substitute env vars, apply defaults and validate.
///
/// Validation errors fail the load; warnings are logged.
pub async fn load_and_prepare(path: &Path) -> Result<RuntimeConfig> {
    let raw_config = load_config(path).await?;

    let value: Value =
        serde_json::to_value(&raw_config).context("failed to serialize config for processing")?;
    let value = resolve_env_vars(&value).context("failed to resolve env vars in config")?;
    let config: RuntimeConfig =
        serde_json::from_value(value).context("failed to deserialize config after processing")?;

    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "config warning");
    }
    if let Some(first) = report.errors.first() {
        for error in &report.errors {
            tracing::error!(path = %error.path, message = %error.message, "config error");
        }
        bail!("{} config error(s), first: {first}", report.errors.len());
    }

    Ok(config)
}

/// [`load_and_prepare`] on `runtime.yaml` in [`config_dir`].
pub async fn load_default() -> Result<RuntimeConfig> {
    load_and_prepare(&config_file_path(&config_dir())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepares_defaults_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_and_prepare(&dir.path().join("none.yaml")).await.unwrap();
        assert_eq!(cfg.core_package_name.as_deref(), Some("core"));
        assert_eq!(cfg.scripts.unwrap().extension.as_deref(), Some("lua"));
    }

    #[tokio::test]
    async fn validation_error_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.yaml");
        std::fs::write(&path, "native:\n  trustPollIntervalMs: 0\n").unwrap();
        let err = load_and_prepare(&path).await.unwrap_err();
        assert!(err.to_string().contains("trustPollIntervalMs"));
    }
}
