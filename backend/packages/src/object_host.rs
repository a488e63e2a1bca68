//! Named script objects owned by a package.

use serde_json::Value;
use tracing::{debug, warn};

use crate::host::{ScriptError, ScriptFunctionRef, SharedScriptHost};

/// Method called on an object when its package releases it, if defined.
pub const DESTROY_METHOD: &str = "OnDestroy";

/// An instance of a script class, created through the class create-function.
pub struct ScriptObjectHost {
    name: String,
    class_name: String,
    instance: Value,
    host: SharedScriptHost,
}

impl ScriptObjectHost {
    /// Instantiates `class_name` by calling `create` with the object name.
    pub fn create(
        name: &str,
        class_name: &str,
        create: ScriptFunctionRef,
        host: SharedScriptHost,
    ) -> Result<Self, ScriptError> {
        let instance = {
            let mut h = host
                .try_borrow_mut()
                .map_err(|_| ScriptError::Runtime("script host is busy".into()))?;
            h.call_function_ref(&create, &[Value::String(name.to_string())])?
        };
        debug!(object = name, class = class_name, "script object created");
        Ok(Self {
            name: name.to_string(),
            class_name: class_name.to_string(),
            instance,
            host,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn instance(&self) -> &Value {
        &self.instance
    }

    fn method_name(&self, method: &str) -> String {
        format!("{}.{}", self.class_name, method)
    }

    /// Calls `{class}.{method}` with the instance prepended to `args`.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(self.instance.clone());
        full_args.extend_from_slice(args);

        let mut host = self
            .host
            .try_borrow_mut()
            .map_err(|_| ScriptError::Runtime("script host is busy".into()))?;
        host.call_named_function(&self.method_name(method), &full_args)
    }

    /// Runs the destroy method when the class defines one.
    pub fn detach(self) {
        let method = self.method_name(DESTROY_METHOD);
        let defined = self
            .host
            .try_borrow()
            .map(|h| h.has_function(&method))
            .unwrap_or(false);
        if defined {
            if let Err(e) = self.call(DESTROY_METHOD, &[]) {
                warn!(object = %self.name, error = %e, "object destroy method failed");
            }
        }
        debug!(object = %self.name, "script object detached");
    }
}

impl std::fmt::Debug for ScriptObjectHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptObjectHost")
            .field("name", &self.name)
            .field("class_name", &self.class_name)
            .field("instance", &self.instance)
            .finish()
    }
}
