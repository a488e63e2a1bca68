//! Script code loading with per-package caches, and the native trust gate.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use packrt_core::{PackageError, PackageResult};
use packrt_logging::{LifecycleEvent, LifecycleLogger, hex_dump};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::context::PackageEnv;
use crate::host::{ScriptFunctionRef, ScriptHost, TrustAuthority};
use crate::resources::{CodeAsset, ResourceContainer};

/// Script loader of one package.
///
/// Classes are cached by class name, files by resolved real path. Both
/// caches live until [`CodeLoader::clear`].
pub struct CodeLoader {
    package: String,
    env: Rc<PackageEnv>,
    classes: HashMap<String, ScriptFunctionRef>,
    files: HashMap<String, Value>,
}

impl CodeLoader {
    pub fn new(package: &str, env: Rc<PackageEnv>) -> Self {
        Self {
            package: package.to_string(),
            env,
            classes: HashMap::new(),
            files: HashMap::new(),
        }
    }

    /// Runs `f` with exclusive access to the script host.
    pub fn with_host<R>(&self, f: impl FnOnce(&mut dyn ScriptHost) -> R) -> PackageResult<R> {
        let mut host = self
            .env
            .script_host
            .try_borrow_mut()
            .map_err(|_| PackageError::ExecutionFailed {
                package: self.package.clone(),
                reason: "script host is busy".into(),
            })?;
        Ok(f(&mut *host))
    }

    /// Probes the configured candidate paths for script `name`.
    pub fn find_code(
        &self,
        container: Option<&dyn ResourceContainer>,
        name: &str,
    ) -> PackageResult<CodeAsset> {
        let container = container.ok_or_else(|| PackageError::NotLoaded {
            package: self.package.clone(),
            what: "resource container".into(),
        })?;
        self.env
            .settings
            .script_candidates(name)
            .iter()
            .find_map(|candidate| container.load_code(candidate))
            .ok_or_else(|| PackageError::MissingReference {
                package: self.package.clone(),
                name: name.to_string(),
                reason: "file not found".into(),
            })
    }

    /// Returns the create-function of script class `name`, loading it once.
    pub fn require_class(
        &mut self,
        container: Option<&dyn ResourceContainer>,
        name: &str,
    ) -> PackageResult<ScriptFunctionRef> {
        if let Some(func) = self.classes.get(name) {
            return Ok(*func);
        }

        if let Some(func) = self.with_host(|h| h.lookup_registered_class(name))? {
            debug!(package = %self.package, class = name, "class already registered with host");
            self.classes.insert(name.to_string(), func);
            return Ok(func);
        }

        let code = self.find_code(container, name)?;
        if code.data.is_empty() {
            return Err(PackageError::MissingReference {
                package: self.package.clone(),
                name: name.to_string(),
                reason: "file is empty".into(),
            });
        }

        self.with_host(|h| h.execute_buffer(&code.data, &code.debug_path))?
            .map_err(|e| PackageError::ExecutionFailed {
                package: self.package.clone(),
                reason: format!("cannot import class `{name}`: {e}"),
            })?;

        let func = self
            .with_host(|h| h.lookup_registered_class(name))?
            .ok_or_else(|| PackageError::MissingReference {
                package: self.package.clone(),
                name: name.to_string(),
                reason: format!("no class create function registered for `{name}`"),
            })?;
        info!(package = %self.package, class = name, path = %code.real_path, "script class loaded");
        self.classes.insert(name.to_string(), func);
        Ok(func)
    }

    /// Executes script file `name` found in `source`.
    ///
    /// With `once`, a file that already ran (same real path) is not executed
    /// again and its first result is returned. Otherwise the file runs and
    /// its result replaces the cached one.
    pub fn require_file(
        &mut self,
        source: Option<&dyn ResourceContainer>,
        name: &str,
        once: bool,
    ) -> PackageResult<Value> {
        let code = self.find_code(source, name)?;
        if code.data.is_empty() {
            return Err(PackageError::EmptyFile {
                package: self.package.clone(),
                name: name.to_string(),
            });
        }

        if once {
            if let Some(cached) = self.files.get(&code.real_path) {
                return Ok(cached.clone());
            }
        }

        let result = self.with_host(|h| h.execute_buffer(&code.data, &code.debug_path))?;
        match result {
            Ok(value) => {
                debug!(package = %self.package, file = name, path = %code.real_path, "script file executed");
                self.files.insert(code.real_path, value.clone());
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains(&self.env.settings.corrupt_payload_signature) {
                    debug!(
                        package = %self.package,
                        file = name,
                        "check code bytes\n{}",
                        hex_dump(&code.data)
                    );
                }
                Err(PackageError::ExecutionFailed {
                    package: self.package.clone(),
                    reason: format!("cannot import `{name}`: {message}"),
                })
            }
        }
    }

    pub fn cached_class(&self, name: &str) -> Option<ScriptFunctionRef> {
        self.classes.get(name).copied()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn clear(&mut self) {
        self.classes.clear();
        self.files.clear();
    }
}

/// Asks `trust` whether `package` may load native code, waiting for the
/// decision if one has to be made.
pub async fn wait_for_trust(trust: &dyn TrustAuthority, package: &str, poll: Duration) -> bool {
    if trust.is_trusted(package) {
        return true;
    }

    LifecycleLogger::log_event(package, LifecycleEvent::TrustRequested);
    trust.request_trust_decision(package);
    while !trust.poll_trust_decision_finished() {
        tokio::time::sleep(poll).await;
    }

    let granted = trust.trust_decision_result();
    if !granted {
        warn!(package, "native code load denied");
        LifecycleLogger::log_event(package, LifecycleEvent::TrustDenied);
    }
    granted
}
