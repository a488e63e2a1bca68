//! Hand-written collaborators for tests.
//!
//! `MockScriptHost` understands a tiny line-based script language:
//!
//! - `class Name` registers a class create-function `Name`;
//! - `return <json>` sets the chunk result;
//! - `error <message>` fails the chunk with `message`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use crate::context::{LoaderSettings, PackageEnv};
use crate::host::{ScriptError, ScriptFunctionRef, ScriptHost, TrustAuthority};
use crate::native::{EntryLookupError, NativeLoadError, NativeModule, NativeModuleHost, RuntimeContext};

type Function = Box<dyn Fn(&[Value]) -> Result<Value, ScriptError>>;

pub struct MockScriptHost {
    classes: HashMap<String, ScriptFunctionRef>,
    class_names: HashMap<ScriptFunctionRef, String>,
    functions: HashMap<String, Function>,
    next_ref: u64,
    pub executed: Vec<String>,
    pub calls: Vec<(String, Vec<Value>)>,
}

impl MockScriptHost {
    /// A host that already defines the default bootstrap function.
    pub fn new() -> Self {
        let mut host = Self {
            classes: HashMap::new(),
            class_names: HashMap::new(),
            functions: HashMap::new(),
            next_ref: 1,
            executed: Vec::new(),
            calls: Vec::new(),
        };
        let bootstrap = LoaderSettings::default().bootstrap_function;
        host.define(&bootstrap, |_| Ok(Value::Bool(true)));
        host
    }

    pub fn define(
        &mut self,
        name: &str,
        f: impl Fn(&[Value]) -> Result<Value, ScriptError> + 'static,
    ) {
        self.functions.insert(name.to_string(), Box::new(f));
    }

    pub fn register_class(&mut self, name: &str) -> ScriptFunctionRef {
        if let Some(existing) = self.classes.get(name) {
            return *existing;
        }
        let func = ScriptFunctionRef(self.next_ref);
        self.next_ref += 1;
        self.classes.insert(name.to_string(), func);
        self.class_names.insert(func, name.to_string());
        func
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.calls.iter().filter(|(n, _)| n == name).count()
    }
}

impl ScriptHost for MockScriptHost {
    fn execute_buffer(&mut self, code: &[u8], debug_path: &str) -> Result<Value, ScriptError> {
        self.executed.push(debug_path.to_string());
        let text = String::from_utf8_lossy(code).into_owned();
        let mut result = Value::Null;
        for line in text.lines().map(str::trim) {
            if let Some(name) = line.strip_prefix("class ") {
                self.register_class(name.trim());
            } else if let Some(json) = line.strip_prefix("return ") {
                result = serde_json::from_str(json)
                    .map_err(|e| ScriptError::Runtime(format!("{debug_path}: {e}")))?;
            } else if let Some(message) = line.strip_prefix("error ") {
                return Err(ScriptError::Runtime(message.to_string()));
            }
        }
        Ok(result)
    }

    fn call_named_function(&mut self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        self.calls.push((name.to_string(), args.to_vec()));
        match self.functions.get(name) {
            Some(f) => f(args),
            None => Err(ScriptError::FunctionNotFound(name.to_string())),
        }
    }

    fn call_function_ref(
        &mut self,
        func: &ScriptFunctionRef,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        let class = self
            .class_names
            .get(func)
            .ok_or(ScriptError::InvalidReference(func.0))?;
        Ok(json!({"class": class, "name": args.first().cloned().unwrap_or(Value::Null)}))
    }

    fn lookup_registered_class(&self, name: &str) -> Option<ScriptFunctionRef> {
        self.classes.get(name).copied()
    }

    fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Trust authority with a scripted answer.
pub struct MockTrust {
    trusted: bool,
    pending_polls: Cell<u32>,
    result: bool,
    requests: Cell<u32>,
    polls: Cell<u32>,
}

impl MockTrust {
    pub fn trusted() -> Self {
        Self::build(true, 0, true)
    }

    /// Untrusted; the decision finishes after `pending_polls` unfinished polls.
    pub fn pending(pending_polls: u32, result: bool) -> Self {
        Self::build(false, pending_polls, result)
    }

    fn build(trusted: bool, pending_polls: u32, result: bool) -> Self {
        Self {
            trusted,
            pending_polls: Cell::new(pending_polls),
            result,
            requests: Cell::new(0),
            polls: Cell::new(0),
        }
    }

    pub fn requests(&self) -> u32 {
        self.requests.get()
    }

    pub fn polls(&self) -> u32 {
        self.polls.get()
    }
}

impl TrustAuthority for MockTrust {
    fn is_trusted(&self, _package: &str) -> bool {
        self.trusted
    }

    fn request_trust_decision(&self, _package: &str) {
        self.requests.set(self.requests.get() + 1);
    }

    fn poll_trust_decision_finished(&self) -> bool {
        self.polls.set(self.polls.get() + 1);
        match self.pending_polls.get() {
            0 => true,
            n => {
                self.pending_polls.set(n - 1);
                false
            }
        }
    }

    fn trust_decision_result(&self) -> bool {
        self.result
    }
}

/// Behaviour of a fake native library.
#[derive(Clone, Copy)]
pub struct MockLibrary {
    pub has_type: bool,
    pub has_method: bool,
    pub status: i32,
}

impl MockLibrary {
    pub fn ok() -> Self {
        Self {
            has_type: true,
            has_method: true,
            status: 0,
        }
    }
}

/// Native host serving [`MockLibrary`] entries by package name.
#[derive(Default)]
pub struct MockNativeHost {
    libraries: HashMap<String, MockLibrary>,
    pub invocations: Rc<RefCell<Vec<(String, String, String)>>>,
}

impl MockNativeHost {
    pub fn with_library(mut self, package: &str, lib: MockLibrary) -> Self {
        self.libraries.insert(package.to_string(), lib);
        self
    }
}

impl NativeModuleHost for MockNativeHost {
    fn resolve(&self, root: &Path, name: &str) -> Result<PathBuf, NativeLoadError> {
        let path = root.join(format!("{name}.mocklib"));
        if self.libraries.contains_key(name) {
            Ok(path)
        } else {
            Err(NativeLoadError::NotFound(path))
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, NativeLoadError> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let lib = self.libraries.get(&name).copied().ok_or_else(|| NativeLoadError::Open {
            path: path.to_path_buf(),
            reason: "unknown mock library".into(),
        })?;
        Ok(Box::new(MockModule {
            lib,
            invocations: Rc::clone(&self.invocations),
        }))
    }
}

struct MockModule {
    lib: MockLibrary,
    invocations: Rc<RefCell<Vec<(String, String, String)>>>,
}

impl NativeModule for MockModule {
    fn invoke_entry(
        &self,
        entry_type: &str,
        method: &str,
        ctx: &RuntimeContext,
    ) -> Result<i32, EntryLookupError> {
        if !self.lib.has_type {
            return Err(EntryLookupError::TypeNotFound(entry_type.to_string()));
        }
        if !self.lib.has_method {
            return Err(EntryLookupError::MethodNotFound(method.to_string()));
        }
        self.invocations.borrow_mut().push((
            ctx.package().to_string(),
            entry_type.to_string(),
            method.to_string(),
        ));
        Ok(self.lib.status)
    }
}

/// Settings with a fast trust poll.
pub fn test_settings() -> LoaderSettings {
    LoaderSettings {
        build_version: 10,
        trust_poll_interval: std::time::Duration::from_millis(1),
        ..LoaderSettings::default()
    }
}

pub fn env_with(host: Rc<RefCell<MockScriptHost>>) -> Rc<PackageEnv> {
    Rc::new(PackageEnv::new(
        test_settings(),
        host,
        Rc::new(MockTrust::trusted()),
        Rc::new(MockNativeHost::default()),
    ))
}

/// Writes `files` under a fresh temp directory.
pub fn package_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_files(dir.path(), files);
    dir
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, data) in files {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, data).unwrap();
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Runs `f` under a debug-level subscriber and returns what it logged.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    let text = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (result, text)
}
