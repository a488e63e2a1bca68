//! Config validation.

use crate::schema::RuntimeConfig;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// Errors and warnings found in one validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &RuntimeConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_packages(config, &mut report);
    validate_scripts(config, &mut report);
    validate_native(config, &mut report);
    report
}

fn validate_packages(config: &RuntimeConfig, report: &mut ValidationReport) {
    if config.build_version == Some(0) {
        report.error("buildVersion", "buildVersion must be >= 1");
    }
    for (path, name) in [
        ("corePackageName", &config.core_package_name),
        ("systemPackageName", &config.system_package_name),
    ] {
        if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            report.error(path, "package name cannot be empty");
        }
    }
    if config.core_package_name() == config.system_package_name() {
        report.warn(
            "corePackageName",
            "core and system package share a name; it will be treated as the system package",
        );
    }
}

fn validate_scripts(config: &RuntimeConfig, report: &mut ValidationReport) {
    let Some(scripts) = &config.scripts else { return };
    for (path, ext) in [
        ("scripts.extension", &scripts.extension),
        ("scripts.compiledExtension", &scripts.compiled_extension),
    ] {
        if let Some(ext) = ext {
            if ext.starts_with('.') {
                report.warn(path, format!("extension '{ext}' should not start with a dot"));
            }
        }
    }
    if scripts
        .bootstrap_function
        .as_deref()
        .is_some_and(|f| f.trim().is_empty())
    {
        report.error("scripts.bootstrapFunction", "bootstrap function name cannot be empty");
    }
}

fn validate_native(config: &RuntimeConfig, report: &mut ValidationReport) {
    let Some(native) = &config.native else { return };
    if native.trust_poll_interval_ms == Some(0) {
        report.error("native.trustPollIntervalMs", "trustPollIntervalMs must be > 0");
    }
    for (path, ident) in [
        ("native.entryType", &native.entry_type),
        ("native.entryMethod", &native.entry_method),
    ] {
        if let Some(ident) = ident {
            let valid = !ident.is_empty()
                && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                report.error(path, format!("'{ident}' is not a valid symbol name"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NativeConfig, ScriptsConfig};

    #[test]
    fn empty_config_is_valid() {
        let report = validate(&RuntimeConfig::default());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn zero_poll_interval_is_error() {
        let cfg = RuntimeConfig {
            native: Some(NativeConfig {
                trust_poll_interval_ms: Some(0),
                entry_method: Some("Main-Entry".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&cfg);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].path.contains("trustPollIntervalMs"));
    }

    #[test]
    fn dotted_extension_is_warning() {
        let cfg = RuntimeConfig {
            scripts: Some(ScriptsConfig {
                extension: Some(".lua".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = validate(&cfg);
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn shared_core_and_system_name_warns() {
        let cfg = RuntimeConfig {
            core_package_name: Some("system".into()),
            ..Default::default()
        };
        let report = validate(&cfg);
        assert!(report.warnings[0].message.contains("share a name"));
    }
}
