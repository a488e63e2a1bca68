//! Collaborators the runtime talks to but does not implement: the script
//! engine, the trust prompt and the localization service.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{0}")]
    Runtime(String),

    #[error("function `{0}` not found")]
    FunctionNotFound(String),

    #[error("invalid function reference {0}")]
    InvalidReference(u64),
}

/// Opaque handle to a function living inside the script engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScriptFunctionRef(pub u64);

/// Interface to the interpreted-script engine.
pub trait ScriptHost {
    /// Executes a chunk. `debug_path` is used in engine diagnostics.
    fn execute_buffer(&mut self, code: &[u8], debug_path: &str) -> Result<Value, ScriptError>;

    fn call_named_function(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError>;

    fn call_function_ref(
        &mut self,
        func: &ScriptFunctionRef,
        args: &[Value],
    ) -> Result<Value, ScriptError>;

    /// Create-function of a class already registered with the engine.
    fn lookup_registered_class(&self, name: &str) -> Option<ScriptFunctionRef>;

    fn has_function(&self, name: &str) -> bool;
}

/// The engine is shared by every package on the runtime thread.
pub type SharedScriptHost = Rc<RefCell<dyn ScriptHost>>;

/// A named global function of the script engine.
#[derive(Clone)]
pub struct ScriptFunction {
    name: String,
    host: SharedScriptHost,
}

impl ScriptFunction {
    pub(crate) fn new(name: &str, host: SharedScriptHost) -> Self {
        Self {
            name: name.to_string(),
            host,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, ScriptError> {
        let mut host = self
            .host
            .try_borrow_mut()
            .map_err(|_| ScriptError::Runtime("script host is busy".into()))?;
        host.call_named_function(&self.name, args)
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptFunction").field("name", &self.name).finish()
    }
}

/// Decides whether a package may load native code.
///
/// The decision may be asynchronous (for example a user prompt): the
/// loader requests it, then polls until it is finished.
pub trait TrustAuthority {
    fn is_trusted(&self, package: &str) -> bool;
    fn request_trust_decision(&self, package: &str);
    fn poll_trust_decision_finished(&self) -> bool;
    fn trust_decision_result(&self) -> bool;
}

/// Trusts nothing and answers immediately.
pub struct DenyAllTrust;

impl TrustAuthority for DenyAllTrust {
    fn is_trusted(&self, _package: &str) -> bool {
        false
    }

    fn request_trust_decision(&self, _package: &str) {}

    fn poll_trust_decision_finished(&self) -> bool {
        true
    }

    fn trust_decision_result(&self) -> bool {
        false
    }
}

pub trait Localizer {
    /// Merges a package language resource document into the global table.
    fn load_language_resources(&self, text: &str) -> bool;

    /// Parses a pre-load resource document into a key/value table.
    fn preload_language_resources(&self, text: &str) -> HashMap<String, String>;
}

pub struct NoopLocalizer;

impl Localizer for NoopLocalizer {
    fn load_language_resources(&self, _text: &str) -> bool {
        true
    }

    fn preload_language_resources(&self, _text: &str) -> HashMap<String, String> {
        HashMap::new()
    }
}
