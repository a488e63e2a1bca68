//! Config defaults: applies default values to a parsed config.

use crate::schema::{LoggingConfig, NativeConfig, RuntimeConfig, ScriptsConfig};

pub const DEFAULT_BUILD_VERSION: u32 = 1;

pub const DEFAULT_PACKAGES_DIR: &str = "packages";

pub const DEFAULT_CORE_PACKAGE_NAME: &str = "core";

pub const DEFAULT_SYSTEM_PACKAGE_NAME: &str = "system";

pub const DEFAULT_SCRIPT_EXTENSION: &str = "lua";

pub const DEFAULT_COMPILED_SCRIPT_EXTENSION: &str = "luac";

pub const DEFAULT_SCRIPT_SUBFOLDER: &str = "Scripts";

pub const DEFAULT_BOOTSTRAP_FUNCTION: &str = "CorePackageLoaded";

pub const DEFAULT_CORRUPT_PAYLOAD_SIGNATURE: &str = "bad header in precompiled chunk";

pub const DEFAULT_NATIVE_ENTRY_TYPE: &str = "PackageEntry";

pub const DEFAULT_NATIVE_ENTRY_METHOD: &str = "Main";

pub const DEFAULT_TRUST_POLL_INTERVAL_MS: u64 = 100;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: RuntimeConfig) -> RuntimeConfig {
    let config = apply_package_defaults(config);
    let config = apply_script_defaults(config);
    let config = apply_native_defaults(config);
    apply_logging_defaults(config)
}

fn apply_package_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    config.build_version.get_or_insert(DEFAULT_BUILD_VERSION);
    config
        .packages_dir
        .get_or_insert_with(|| DEFAULT_PACKAGES_DIR.into());
    config
        .core_package_name
        .get_or_insert_with(|| DEFAULT_CORE_PACKAGE_NAME.to_string());
    config
        .system_package_name
        .get_or_insert_with(|| DEFAULT_SYSTEM_PACKAGE_NAME.to_string());
    config
}

fn apply_script_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let scripts = config.scripts.get_or_insert_with(ScriptsConfig::default);
    scripts
        .extension
        .get_or_insert_with(|| DEFAULT_SCRIPT_EXTENSION.to_string());
    scripts
        .compiled_extension
        .get_or_insert_with(|| DEFAULT_COMPILED_SCRIPT_EXTENSION.to_string());
    scripts
        .subfolder
        .get_or_insert_with(|| DEFAULT_SCRIPT_SUBFOLDER.to_string());
    scripts
        .bootstrap_function
        .get_or_insert_with(|| DEFAULT_BOOTSTRAP_FUNCTION.to_string());
    scripts
        .corrupt_payload_signature
        .get_or_insert_with(|| DEFAULT_CORRUPT_PAYLOAD_SIGNATURE.to_string());
    config
}

fn apply_native_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let native = config.native.get_or_insert_with(NativeConfig::default);
    native
        .entry_type
        .get_or_insert_with(|| DEFAULT_NATIVE_ENTRY_TYPE.to_string());
    native
        .entry_method
        .get_or_insert_with(|| DEFAULT_NATIVE_ENTRY_METHOD.to_string());
    native
        .trust_poll_interval_ms
        .get_or_insert(DEFAULT_TRUST_POLL_INTERVAL_MS);
    config
}

fn apply_logging_defaults(mut config: RuntimeConfig) -> RuntimeConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    config
}
