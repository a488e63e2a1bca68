//! Runtime configuration schema.
//!
//! Every field is optional on disk; [`crate::defaults::apply_all_defaults`]
//! fills the gaps and the accessor methods fall back to the same defaults
//! for configs that never went through it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::defaults::*;

/// Root configuration for the package runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Version of the host runtime, compared against manifest `MinVersion`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_version: Option<u32>,

    /// Directory scanned for package manifests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_dir: Option<PathBuf>,

    /// Name of the package that may never be unloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_package_name: Option<String>,

    /// Name of the system package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_package_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scripts: Option<ScriptsConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Script lookup and bootstrap settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptsConfig {
    /// Source script extension, without the dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    /// Precompiled script extension, without the dot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_extension: Option<String>,

    /// Folder inside a package probed after the package root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder: Option<String>,

    /// Script function called with `[name, entry_code]` after code load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_function: Option<String>,

    /// Host error text that marks a corrupt precompiled payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrupt_payload_signature: Option<String>,
}

/// Native module entry and trust settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_method: Option<String>,

    /// Delay between trust decision polls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `packrt_packages=debug`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Directory for the rolling JSON log; console only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn build_version(&self) -> u32 {
        self.build_version.unwrap_or(DEFAULT_BUILD_VERSION)
    }

    pub fn core_package_name(&self) -> &str {
        self.core_package_name
            .as_deref()
            .unwrap_or(DEFAULT_CORE_PACKAGE_NAME)
    }

    pub fn system_package_name(&self) -> &str {
        self.system_package_name
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PACKAGE_NAME)
    }

    pub fn script_extension(&self) -> &str {
        self.scripts
            .as_ref()
            .and_then(|s| s.extension.as_deref())
            .unwrap_or(DEFAULT_SCRIPT_EXTENSION)
    }

    pub fn compiled_script_extension(&self) -> &str {
        self.scripts
            .as_ref()
            .and_then(|s| s.compiled_extension.as_deref())
            .unwrap_or(DEFAULT_COMPILED_SCRIPT_EXTENSION)
    }

    pub fn script_subfolder(&self) -> &str {
        self.scripts
            .as_ref()
            .and_then(|s| s.subfolder.as_deref())
            .unwrap_or(DEFAULT_SCRIPT_SUBFOLDER)
    }

    pub fn bootstrap_function(&self) -> &str {
        self.scripts
            .as_ref()
            .and_then(|s| s.bootstrap_function.as_deref())
            .unwrap_or(DEFAULT_BOOTSTRAP_FUNCTION)
    }

    pub fn corrupt_payload_signature(&self) -> &str {
        self.scripts
            .as_ref()
            .and_then(|s| s.corrupt_payload_signature.as_deref())
            .unwrap_or(DEFAULT_CORRUPT_PAYLOAD_SIGNATURE)
    }

    pub fn native_entry_type(&self) -> &str {
        self.native
            .as_ref()
            .and_then(|n| n.entry_type.as_deref())
            .unwrap_or(DEFAULT_NATIVE_ENTRY_TYPE)
    }

    pub fn native_entry_method(&self) -> &str {
        self.native
            .as_ref()
            .and_then(|n| n.entry_method.as_deref())
            .unwrap_or(DEFAULT_NATIVE_ENTRY_METHOD)
    }

    pub fn trust_poll_interval_ms(&self) -> u64 {
        self.native
            .as_ref()
            .and_then(|n| n.trust_poll_interval_ms)
            .unwrap_or(DEFAULT_TRUST_POLL_INTERVAL_MS)
    }

    pub fn packages_dir(&self) -> &std::path::Path {
        self.packages_dir
            .as_deref()
            .unwrap_or(std::path::Path::new(DEFAULT_PACKAGES_DIR))
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> Option<&std::path::Path> {
        self.logging.as_ref().and_then(|l| l.dir.as_deref())
    }
}
