//! Shared collaborators and settings handed to every package.

use std::rc::Rc;
use std::time::Duration;

use packrt_config::RuntimeConfig;

use crate::host::{Localizer, NoopLocalizer, SharedScriptHost, TrustAuthority};
use crate::native::NativeModuleHost;

/// Loader settings resolved from [`RuntimeConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
    pub build_version: u32,
    pub script_extension: String,
    pub compiled_script_extension: String,
    pub script_subfolder: String,
    pub bootstrap_function: String,
    pub corrupt_payload_signature: String,
    pub native_entry_type: String,
    pub native_entry_method: String,
    pub trust_poll_interval: Duration,
}

impl LoaderSettings {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            build_version: config.build_version(),
            script_extension: config.script_extension().to_string(),
            compiled_script_extension: config.compiled_script_extension().to_string(),
            script_subfolder: config.script_subfolder().to_string(),
            bootstrap_function: config.bootstrap_function().to_string(),
            corrupt_payload_signature: config.corrupt_payload_signature().to_string(),
            native_entry_type: config.native_entry_type().to_string(),
            native_entry_method: config.native_entry_method().to_string(),
            trust_poll_interval: Duration::from_millis(config.trust_poll_interval_ms()),
        }
    }

    /// Candidate asset paths for script `name`, in probe order.
    pub fn script_candidates(&self, name: &str) -> Vec<String> {
        let local = [
            name.to_string(),
            format!("{name}.{}", self.script_extension),
            format!("{name}.{}", self.compiled_script_extension),
        ];
        let nested = local
            .iter()
            .map(|p| format!("{}/{p}", self.script_subfolder))
            .collect::<Vec<_>>();
        local.into_iter().chain(nested).collect()
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from_config(&RuntimeConfig::default())
    }
}

/// Everything a package needs from the outside world.
pub struct PackageEnv {
    pub script_host: SharedScriptHost,
    pub trust: Rc<dyn TrustAuthority>,
    pub native: Rc<dyn NativeModuleHost>,
    pub localizer: Rc<dyn Localizer>,
    pub settings: LoaderSettings,
}

impl PackageEnv {
    pub fn new(
        settings: LoaderSettings,
        script_host: SharedScriptHost,
        trust: Rc<dyn TrustAuthority>,
        native: Rc<dyn NativeModuleHost>,
    ) -> Self {
        Self {
            script_host,
            trust,
            native,
            localizer: Rc::new(NoopLocalizer),
            settings,
        }
    }

    pub fn with_localizer(mut self, localizer: Rc<dyn Localizer>) -> Self {
        self.localizer = localizer;
        self
    }
}
