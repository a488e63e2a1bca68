//! A registered package and its lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use packrt_core::{HandlerId, HandlerRegistry, PackageError, PackageResult, ScopedHandler, record_and_log};
use packrt_logging::{LifecycleEvent, LifecycleLogger};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::PackageEnv;
use crate::deps::DependencyTracker;
use crate::host::{ScriptError, ScriptFunction, ScriptFunctionRef};
use crate::lifecycle::{LifecycleState, PackageFlags, PackageStatus, Transition, transition};
use crate::loader::{CodeLoader, wait_for_trust};
use crate::manifest::{PackageDescriptor, PackageKind};
use crate::native::{EntryLookupError, NativeLoadError, NativeModule, RuntimeContext};
use crate::object_host::ScriptObjectHost;
use crate::resources::{CodeAsset, ResourceContainer};

/// Language table read when the package is constructed.
pub const LANGUAGE_RES_PRELOAD_FILE: &str = "PackageLanguageResPre.xml";
/// Language resources merged into the global table on load.
pub const LANGUAGE_RES_FILE: &str = "PackageLanguageRes.xml";

/// Hook run on entry or before unload. Returning `false` reports failure.
pub type EntryHook = Rc<dyn Fn(&Package) -> bool>;

/// Entry and exit hooks of a module package.
#[derive(Clone, Default)]
pub struct PackageEntry {
    pub on_load: Option<EntryHook>,
    pub on_before_unload: Option<EntryHook>,
}

pub struct Package {
    descriptor: PackageDescriptor,
    env: Rc<PackageEnv>,
    state: LifecycleState,
    status: PackageStatus,
    policy: PackageFlags,
    script_loaded: bool,
    native_loaded: bool,
    pub(crate) deps: DependencyTracker,
    /// Dependencies this package holds a reference on.
    pub(crate) acquired: Vec<String>,
    native_module: Option<Box<dyn NativeModule>>,
    loader: CodeLoader,
    handlers: HandlerRegistry,
    objects: BTreeMap<String, ScriptObjectHost>,
    entry: PackageEntry,
    container: Option<Box<dyn ResourceContainer>>,
    manifest_path: Option<PathBuf>,
    load_error: Option<String>,
    custom_props: HashMap<String, Value>,
    localized: HashMap<String, String>,
}

impl Package {
    pub fn new(
        descriptor: PackageDescriptor,
        container: Option<Box<dyn ResourceContainer>>,
        env: Rc<PackageEnv>,
    ) -> Self {
        let localized = container
            .as_ref()
            .and_then(|c| c.load_text(LANGUAGE_RES_PRELOAD_FILE))
            .map(|text| env.localizer.preload_language_resources(&text))
            .unwrap_or_default();

        Self {
            loader: CodeLoader::new(&descriptor.name, Rc::clone(&env)),
            descriptor,
            env,
            state: LifecycleState::NotLoaded,
            status: PackageStatus::Registered,
            policy: PackageFlags::empty(),
            script_loaded: false,
            native_loaded: false,
            deps: DependencyTracker::new(),
            acquired: Vec::new(),
            native_module: None,
            handlers: HandlerRegistry::new(),
            objects: BTreeMap::new(),
            entry: PackageEntry::default(),
            container,
            manifest_path: None,
            load_error: None,
            custom_props: HashMap::new(),
            localized,
        }
    }

    // ---- introspection ----

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn version(&self) -> u32 {
        self.descriptor.version
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn status(&self) -> PackageStatus {
        self.status
    }

    pub fn is_loaded(&self) -> bool {
        self.status == PackageStatus::Loaded
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == LifecycleState::Destroyed
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    pub fn dependency_tracker(&self) -> &DependencyTracker {
        &self.deps
    }

    pub fn has_native_module(&self) -> bool {
        self.native_module.is_some()
    }

    /// Lifecycle bits derived from the state plus the policy bits.
    pub fn flags(&self) -> PackageFlags {
        let mut flags = self.state.flags() | self.policy;
        if self.script_loaded {
            flags |= PackageFlags::SCRIPT_PACK_LOADED;
        }
        if self.native_loaded {
            flags |= PackageFlags::NATIVE_PACK_LOADED;
        }
        flags
    }

    /// Updates the policy bits.
    ///
    /// Lifecycle bits in `flags` are ignored. `NOT_UNLOADABLE` and
    /// `SYSTEM_PACKAGE` cannot be cleared once set, and `SYSTEM_PACKAGE`
    /// implies `NOT_UNLOADABLE`.
    pub fn set_flags(&mut self, flags: PackageFlags) -> PackageResult<PackageFlags> {
        self.ensure_alive()?;

        let requested = flags & PackageFlags::LIFECYCLE;
        if requested != self.flags() & PackageFlags::LIFECYCLE {
            warn!(package = %self.name(), ?requested, "lifecycle flags are read-only, ignoring");
        }

        let mut policy = flags & PackageFlags::POLICY;
        for sticky in [PackageFlags::NOT_UNLOADABLE, PackageFlags::SYSTEM_PACKAGE] {
            if self.policy.contains(sticky) && !policy.contains(sticky) {
                error!(package = %self.name(), flag = ?sticky, "policy violation: flag cannot be cleared");
                policy.insert(sticky);
            }
        }
        if policy.contains(PackageFlags::SYSTEM_PACKAGE) {
            policy.insert(PackageFlags::NOT_UNLOADABLE);
        }

        self.policy = policy;
        Ok(self.flags())
    }

    // ---- lifecycle ----

    /// Records where the manifest came from.
    pub fn load_info(&mut self, path: impl Into<PathBuf>) -> PackageResult<()> {
        self.ensure_alive()?;
        self.manifest_path = Some(path.into());
        Ok(())
    }

    pub fn set_entry(&mut self, entry: PackageEntry) -> PackageResult<()> {
        self.ensure_alive()?;
        self.entry = entry;
        Ok(())
    }

    /// Loads the package: language resources, then the code base for modules.
    pub async fn load_package(&mut self) -> PackageResult<()> {
        self.ensure_alive()?;
        if self.is_loaded() {
            debug!(package = %self.name(), "package already loaded");
            return Ok(());
        }

        self.status = PackageStatus::Loading;
        self.load_error = None;
        LifecycleLogger::log_event(self.name(), LifecycleEvent::LoadStarted);
        self.load_language_resources();

        let result = match self.descriptor.kind {
            PackageKind::Asset => Ok(()),
            PackageKind::Module => self.load_code_base().await,
        };

        match &result {
            Ok(()) => {
                self.status = PackageStatus::Loaded;
                info!(package = %self.name(), version = self.version(), kind = %self.descriptor.kind, "package loaded");
                LifecycleLogger::log_event(
                    self.name(),
                    LifecycleEvent::Loaded {
                        native: self.native_loaded,
                    },
                );
            }
            Err(e) => {
                self.status = PackageStatus::LoadFailed;
                self.load_error = Some(e.to_string());
                LifecycleLogger::log_event(
                    self.name(),
                    LifecycleEvent::LoadFailed {
                        error: e.to_string(),
                    },
                );
            }
        }
        result
    }

    /// Loads native code (when declared) and bootstraps the script side.
    ///
    /// On failure the package returns to `NotLoaded` with nothing loaded.
    pub async fn load_code_base(&mut self) -> PackageResult<()> {
        self.ensure_alive()?;
        self.advance(Transition::BeginCodeLoad)?;

        match self.load_code_base_steps().await {
            Ok(()) => {
                self.advance(Transition::FinishCodeLoad)?;
                self.script_loaded = true;
                Ok(())
            }
            Err(e) => {
                self.advance(Transition::AbortCodeLoad)?;
                self.script_loaded = false;
                self.native_loaded = false;
                self.native_module = None;
                self.load_error = Some(e.to_string());
                Err(self.fail(e))
            }
        }
    }

    async fn load_code_base_steps(&mut self) -> PackageResult<()> {
        if self.descriptor.contains_native {
            self.load_native().await?;
        }
        if !self.policy.contains(PackageFlags::SYSTEM_PACKAGE) {
            self.run_bootstrap()?;
        }
        Ok(())
    }

    async fn load_native(&mut self) -> PackageResult<()> {
        let name = self.descriptor.name.clone();
        let env = Rc::clone(&self.env);

        if !wait_for_trust(env.trust.as_ref(), &name, env.settings.trust_poll_interval).await {
            return Err(PackageError::AccessDenied(name));
        }

        let root = self
            .container
            .as_ref()
            .and_then(|c| c.root())
            .map(Path::to_path_buf)
            .ok_or_else(|| PackageError::NotLoaded {
                package: name.clone(),
                what: "resource container".into(),
            })?;

        let module = env
            .native
            .resolve(&root, &name)
            .and_then(|path| env.native.open(&path))
            .map_err(|e| match e {
                NativeLoadError::NotFound(path) => PackageError::FileNotFound {
                    package: name.clone(),
                    path: path.display().to_string(),
                },
                other => PackageError::ExecutionFailed {
                    package: name.clone(),
                    reason: other.to_string(),
                },
            })?;

        let settings = &env.settings;
        let ctx = RuntimeContext::new(&name, self.descriptor.version);
        let status = module
            .invoke_entry(&settings.native_entry_type, &settings.native_entry_method, &ctx)
            .map_err(|e| match e {
                EntryLookupError::TypeNotFound(class) => PackageError::ClassNotFound {
                    package: name.clone(),
                    class,
                },
                EntryLookupError::MethodNotFound(function) => PackageError::FunctionNotFound {
                    package: name.clone(),
                    function,
                },
            })?;
        if status != 0 {
            return Err(PackageError::ExecutionFailed {
                package: name,
                reason: format!(
                    "{}.{} returned {status}",
                    settings.native_entry_type, settings.native_entry_method
                ),
            });
        }

        info!(package = %name, "native module loaded");
        self.native_module = Some(module);
        self.native_loaded = true;
        Ok(())
    }

    fn run_bootstrap(&self) -> PackageResult<()> {
        let bootstrap = &self.env.settings.bootstrap_function;
        let args = [
            Value::String(self.descriptor.name.clone()),
            Value::String(self.descriptor.entry_code.clone()),
        ];
        match self.loader.with_host(|h| h.call_named_function(bootstrap, &args))? {
            Ok(Value::Bool(false)) => Err(PackageError::ExecutionFailed {
                package: self.descriptor.name.clone(),
                reason: format!("{bootstrap} returned false"),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(PackageError::ExecutionFailed {
                package: self.descriptor.name.clone(),
                reason: format!("{bootstrap}: {e}"),
            }),
        }
    }

    fn load_language_resources(&self) {
        let Some(text) = self
            .container
            .as_ref()
            .and_then(|c| c.load_text(LANGUAGE_RES_FILE))
        else {
            return;
        };
        if !self.env.localizer.load_language_resources(&text) {
            warn!(package = %self.name(), file = LANGUAGE_RES_FILE, "failed to load language resources");
        }
    }

    /// Runs the entry hook. Module packages only, once per load.
    pub fn run_execution_code(&mut self) -> PackageResult<()> {
        self.ensure_alive()?;
        self.ensure_module("run_execution_code")?;
        self.advance(Transition::RunEntry)?;

        let ok = match self.entry.on_load.clone() {
            Some(hook) => hook(&*self),
            None => true,
        };
        LifecycleLogger::log_event(self.name(), LifecycleEvent::EntryRun { ok });
        if ok {
            Ok(())
        } else {
            Err(self.fail(PackageError::ExecutionFailed {
                package: self.descriptor.name.clone(),
                reason: "entry hook returned false".into(),
            }))
        }
    }

    /// Runs the before-unload hook. Module packages only.
    pub fn run_before_unload_code(&mut self) -> PackageResult<()> {
        self.ensure_alive()?;
        self.ensure_module("run_before_unload_code")?;
        self.advance(Transition::RunUnload)?;

        let ok = match self.entry.on_before_unload.clone() {
            Some(hook) => hook(&*self),
            None => true,
        };
        LifecycleLogger::log_event(self.name(), LifecycleEvent::UnloadRun { ok });
        if ok {
            Ok(())
        } else {
            Err(self.fail(PackageError::ExecutionFailed {
                package: self.descriptor.name.clone(),
                reason: "unload hook returned false".into(),
            }))
        }
    }

    /// Tears the package down. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.is_destroyed() {
            return;
        }

        if self.descriptor.kind == PackageKind::Module
            && self.state.is_code_loaded()
            && self.state != LifecycleState::UnloadRun
        {
            if let Err(e) = self.run_before_unload_code() {
                warn!(package = %self.name(), error = %e, "unload code failed during destroy");
            }
        }

        let failures = self.handlers.dispose_all();
        if !failures.is_empty() {
            warn!(package = %self.name(), count = failures.len(), "some handlers failed to dispose");
        }

        self.loader.clear();
        for (_, object) in std::mem::take(&mut self.objects) {
            object.detach();
        }
        self.native_module = None;
        self.native_loaded = false;
        self.script_loaded = false;
        self.entry = PackageEntry::default();
        if let Some(mut container) = self.container.take() {
            container.unload(true);
        }

        self.state = transition(self.state, Transition::Destroy).unwrap_or(LifecycleState::Destroyed);
        self.status = PackageStatus::Destroyed;
        LifecycleLogger::log_event(self.name(), LifecycleEvent::Destroyed);
    }

    // ---- scripts ----

    pub fn require_class(&mut self, name: &str) -> PackageResult<ScriptFunctionRef> {
        self.ensure_alive()?;
        match self.loader.require_class(self.container.as_deref(), name) {
            Ok(func) => Ok(func),
            Err(e) => Err(self.fail(e)),
        }
    }

    pub fn require_file(&mut self, name: &str, once: bool) -> PackageResult<Value> {
        self.ensure_alive()?;
        match self.loader.require_file(self.container.as_deref(), name, once) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Runs a script file of `other`, caching the result in this package.
    pub fn require_file_from(&mut self, other: &Package, name: &str, once: bool) -> PackageResult<Value> {
        self.ensure_alive()?;
        match self.loader.require_file(other.container.as_deref(), name, once) {
            Ok(value) => Ok(value),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Looks up a global script function. `None` when it does not exist.
    pub fn get_function(&self, name: &str) -> PackageResult<Option<ScriptFunction>> {
        self.ensure_code_loaded()?;
        let exists = self.loader.with_host(|h| h.has_function(name)).map_err(|e| self.fail(e))?;
        Ok(exists.then(|| ScriptFunction::new(name, Rc::clone(&self.env.script_host))))
    }

    pub fn call_function(&self, name: &str, args: &[Value]) -> PackageResult<Value> {
        self.ensure_code_loaded()?;
        self.loader
            .with_host(|h| h.call_named_function(name, args))
            .map_err(|e| self.fail(e))?
            .map_err(|e| self.fail(self.script_error(name, e)))
    }

    /// Calls `name` without arguments if it exists.
    pub fn try_call_function(&self, name: &str) -> PackageResult<Option<Value>> {
        match self.get_function(name)? {
            Some(_) => self.call_function(name, &[]).map(Some),
            None => Ok(None),
        }
    }

    fn script_error(&self, name: &str, e: ScriptError) -> PackageError {
        match e {
            ScriptError::FunctionNotFound(function) => PackageError::FunctionNotFound {
                package: self.descriptor.name.clone(),
                function,
            },
            other => PackageError::ExecutionFailed {
                package: self.descriptor.name.clone(),
                reason: format!("`{name}`: {other}"),
            },
        }
    }

    // ---- object hosts ----

    /// Instantiates `class_name` as object `name`. An existing object with
    /// that name is returned as is.
    pub fn attach_object_host(&mut self, name: &str, class_name: &str) -> PackageResult<&ScriptObjectHost> {
        self.ensure_alive()?;
        if self.objects.contains_key(name) {
            debug!(package = %self.name(), object = name, "object host already attached");
            return Ok(&self.objects[name]);
        }

        let create = self.require_class(class_name)?;
        let object = match ScriptObjectHost::create(name, class_name, create, Rc::clone(&self.env.script_host)) {
            Ok(object) => object,
            Err(e) => {
                let err = PackageError::ExecutionFailed {
                    package: self.descriptor.name.clone(),
                    reason: format!("cannot create `{name}` of class `{class_name}`: {e}"),
                };
                return Err(self.fail(err));
            }
        };
        Ok(self.objects.entry(name.to_string()).or_insert(object))
    }

    pub fn find_object_host(&self, name: &str) -> Option<&ScriptObjectHost> {
        self.objects.get(name)
    }

    pub fn detach_object_host(&mut self, name: &str) -> PackageResult<bool> {
        self.ensure_alive()?;
        match self.objects.remove(name) {
            Some(object) => {
                object.detach();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn call_object_function(&self, object: &str, function: &str, args: &[Value]) -> PackageResult<Value> {
        self.ensure_alive()?;
        let host = self.objects.get(object).ok_or_else(|| {
            self.fail(PackageError::NotLoaded {
                package: self.descriptor.name.clone(),
                what: format!("object host `{object}`"),
            })
        })?;
        host.call(function, args)
            .map_err(|e| self.fail(self.script_error(&format!("{object}.{function}"), e)))
    }

    // ---- custom properties and strings ----

    /// Adds `key` unless present. Returns whether it was added.
    pub fn add_custom_prop(&mut self, key: &str, value: Value) -> PackageResult<bool> {
        self.ensure_alive()?;
        if self.custom_props.contains_key(key) {
            return Ok(false);
        }
        self.custom_props.insert(key.to_string(), value);
        Ok(true)
    }

    pub fn get_custom_prop(&self, key: &str) -> Option<&Value> {
        self.custom_props.get(key)
    }

    /// Replaces an existing value and returns the previous one.
    pub fn set_custom_prop(&mut self, key: &str, value: Value) -> PackageResult<Option<Value>> {
        self.ensure_alive()?;
        Ok(self
            .custom_props
            .get_mut(key)
            .map(|slot| std::mem::replace(slot, value)))
    }

    pub fn remove_custom_prop(&mut self, key: &str) -> PackageResult<Option<Value>> {
        self.ensure_alive()?;
        Ok(self.custom_props.remove(key))
    }

    pub fn localized_string(&self, key: &str) -> Option<&str> {
        self.localized.get(key).map(String::as_str)
    }

    // ---- resources ----

    fn resource_container(&self) -> PackageResult<&dyn ResourceContainer> {
        self.ensure_alive()?;
        self.container.as_deref().ok_or_else(|| {
            self.fail(PackageError::NotLoaded {
                package: self.descriptor.name.clone(),
                what: "resource container".into(),
            })
        })
    }

    pub fn get_asset_bytes(&self, path: &str) -> PackageResult<Vec<u8>> {
        self.resource_container()?.load_bytes(path).ok_or_else(|| {
            self.fail(PackageError::FileNotFound {
                package: self.descriptor.name.clone(),
                path: path.to_string(),
            })
        })
    }

    pub fn get_text_asset(&self, path: &str) -> PackageResult<String> {
        self.resource_container()?.load_text(path).ok_or_else(|| {
            self.fail(PackageError::FileNotFound {
                package: self.descriptor.name.clone(),
                path: path.to_string(),
            })
        })
    }

    /// Finds script `name` with the same probing as [`Package::require_file`].
    pub fn get_code_asset(&self, name: &str) -> PackageResult<CodeAsset> {
        let container = self.resource_container()?;
        self.loader
            .find_code(Some(container), name)
            .map_err(|e| self.fail(e))
    }

    pub fn list_resources(&self) -> PackageResult<Vec<String>> {
        Ok(self.resource_container()?.asset_names())
    }

    // ---- handlers ----

    pub fn register_handler(&mut self, handler: Rc<dyn ScopedHandler>) -> PackageResult<HandlerId> {
        self.ensure_alive()?;
        Ok(self.handlers.register(handler))
    }

    /// Removes a handler without disposing it.
    pub fn unregister_handler(&mut self, id: HandlerId) -> PackageResult<Option<Rc<dyn ScopedHandler>>> {
        self.ensure_alive()?;
        Ok(self.handlers.unregister(id))
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    // ---- helpers ----

    fn fail(&self, err: PackageError) -> PackageError {
        record_and_log(&format!("Package:{}", self.descriptor.name), err)
    }

    fn advance(&mut self, event: Transition) -> PackageResult<()> {
        match transition(self.state, event) {
            Ok(next) => {
                debug!(package = %self.name(), from = ?self.state, to = ?next, "lifecycle transition");
                self.state = next;
                Ok(())
            }
            Err(e) => Err(self.fail(e.into_package_error(&self.descriptor.name))),
        }
    }

    fn ensure_alive(&self) -> PackageResult<()> {
        if self.is_destroyed() {
            return Err(self.fail(PackageError::Destroyed(self.descriptor.name.clone())));
        }
        Ok(())
    }

    fn ensure_module(&self, operation: &'static str) -> PackageResult<()> {
        if self.descriptor.kind != PackageKind::Module {
            return Err(self.fail(PackageError::WrongPackageKind {
                package: self.descriptor.name.clone(),
                operation,
            }));
        }
        Ok(())
    }

    fn ensure_code_loaded(&self) -> PackageResult<()> {
        self.ensure_alive()?;
        if !self.state.is_code_loaded() {
            return Err(self.fail(PackageError::NotLoaded {
                package: self.descriptor.name.clone(),
                what: "code base".into(),
            }));
        }
        Ok(())
    }
}

impl std::fmt::Display for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Package: {}({}) => {}",
            self.descriptor.name, self.descriptor.version, self.status
        )
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.descriptor.name)
            .field("version", &self.descriptor.version)
            .field("state", &self.state)
            .field("status", &self.status)
            .field("flags", &self.flags())
            .field("ref_count", &self.deps.count())
            .finish()
    }
}

impl Drop for Package {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Localizer, TrustAuthority};
    use crate::native::NativeModuleHost;
    use crate::resources::DirectoryContainer;
    use crate::testing::{
        MockLibrary, MockNativeHost, MockScriptHost, MockTrust, env_with, package_dir, test_settings,
    };
    use packrt_core::{CallbackHandler, ErrorKind, HandlerError, last_error};
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    struct Fixture {
        _dir: tempfile::TempDir,
        host: Rc<RefCell<MockScriptHost>>,
        package: Package,
    }

    fn fixture(kind: PackageKind, files: &[(&str, &str)]) -> Fixture {
        let host = Rc::new(RefCell::new(MockScriptHost::new()));
        fixture_with_env(kind, files, host.clone(), env_with(host))
    }

    fn fixture_with_env(
        kind: PackageKind,
        files: &[(&str, &str)],
        host: Rc<RefCell<MockScriptHost>>,
        env: Rc<PackageEnv>,
    ) -> Fixture {
        let dir = package_dir(files);
        let mut descriptor = PackageDescriptor::module("demo", 3, 10);
        descriptor.kind = kind;
        descriptor.entry_code = "Entry.lua".into();
        let package = Package::new(descriptor, Some(Box::new(DirectoryContainer::new(dir.path()))), env);
        Fixture {
            _dir: dir,
            host,
            package,
        }
    }

    fn native_fixture(trust: MockTrust, native: MockNativeHost) -> Fixture {
        let host = Rc::new(RefCell::new(MockScriptHost::new()));
        let trust: Rc<dyn TrustAuthority> = Rc::new(trust);
        let native: Rc<dyn NativeModuleHost> = Rc::new(native);
        let env = Rc::new(PackageEnv::new(test_settings(), host.clone(), trust, native));
        let mut f = fixture_with_env(PackageKind::Module, &[], host, env);
        f.package.descriptor.contains_native = true;
        f
    }

    fn counting_hook(counter: &Rc<Cell<u32>>, result: bool) -> EntryHook {
        let counter = Rc::clone(counter);
        Rc::new(move |_| {
            counter.set(counter.get() + 1);
            result
        })
    }

    #[tokio::test]
    async fn test_asset_package_loads_without_code() {
        let mut f = fixture(PackageKind::Asset, &[("icon.png", "png")]);
        f.package.load_package().await.unwrap();

        assert_eq!(f.package.status(), PackageStatus::Loaded);
        assert_eq!(f.package.state(), LifecycleState::NotLoaded);
        assert!(f.host.borrow().calls.is_empty());
        assert_eq!(f.package.get_asset_bytes("icon.png").unwrap(), b"png");

        let err = f.package.run_execution_code().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongPackageKind);
    }

    #[tokio::test]
    async fn test_module_load_bootstraps_scripts() {
        let mut f = fixture(PackageKind::Module, &[]);
        f.package.load_package().await.unwrap();

        let flags = f.package.flags();
        assert!(flags.contains(PackageFlags::CODE_BASE_LOADED | PackageFlags::SCRIPT_PACK_LOADED));
        assert!(!flags.contains(PackageFlags::NATIVE_PACK_LOADED));
        {
            let host = f.host.borrow();
            assert_eq!(host.calls[0].0, "CorePackageLoaded");
            assert_eq!(host.calls[0].1, vec![json!("demo"), json!("Entry.lua")]);
        }

        let err = f.package.load_code_base().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyInitialized);
        assert_eq!(last_error(), Some(ErrorKind::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_bootstrap_false_aborts_load() {
        let mut f = fixture(PackageKind::Module, &[]);
        f.host.borrow_mut().define("CorePackageLoaded", |_| Ok(json!(false)));

        let err = f.package.load_package().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert_eq!(f.package.state(), LifecycleState::NotLoaded);
        assert_eq!(f.package.status(), PackageStatus::LoadFailed);
        assert!(f.package.flags().is_empty());
        assert!(f.package.load_error().unwrap().contains("returned false"));
        assert_eq!(last_error(), Some(ErrorKind::ExecutionFailed));

        // a failed load can be retried
        f.host.borrow_mut().define("CorePackageLoaded", |_| Ok(json!(true)));
        f.package.load_package().await.unwrap();
        assert!(f.package.is_loaded());
        assert!(f.package.load_error().is_none());
    }

    #[tokio::test]
    async fn test_system_package_skips_bootstrap() {
        let mut f = fixture(PackageKind::Module, &[]);
        f.package.set_flags(PackageFlags::SYSTEM_PACKAGE).unwrap();
        f.package.load_package().await.unwrap();
        assert_eq!(f.host.borrow().calls_to("CorePackageLoaded"), 0);
        assert!(f.package.flags().contains(PackageFlags::CODE_BASE_LOADED));
    }

    #[tokio::test]
    async fn test_entry_runs_once() {
        let mut f = fixture(PackageKind::Module, &[]);
        let runs = Rc::new(Cell::new(0));
        f.package
            .set_entry(PackageEntry {
                on_load: Some(counting_hook(&runs, true)),
                on_before_unload: None,
            })
            .unwrap();

        let err = f.package.run_execution_code().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotLoaded);

        f.package.load_package().await.unwrap();
        f.package.run_execution_code().unwrap();
        let err = f.package.run_execution_code().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExecuted);
        assert_eq!(runs.get(), 1);
        assert!(f.package.flags().contains(PackageFlags::ENTRY_CODE_RUN));
    }

    #[tokio::test]
    async fn test_entry_and_unload_alternate() {
        let mut f = fixture(PackageKind::Module, &[]);
        let entries = Rc::new(Cell::new(0));
        let unloads = Rc::new(Cell::new(0));
        f.package
            .set_entry(PackageEntry {
                on_load: Some(counting_hook(&entries, false)),
                on_before_unload: Some(counting_hook(&unloads, true)),
            })
            .unwrap();
        f.package.load_package().await.unwrap();

        // a false hook still marks entry as run
        let err = f.package.run_execution_code().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionFailed);
        assert_eq!(f.package.state(), LifecycleState::EntryRun);

        f.package.run_before_unload_code().unwrap();
        let _ = f.package.run_execution_code();
        f.package.run_before_unload_code().unwrap();
        let flags = f.package.flags();
        assert!(flags.contains(PackageFlags::UNLOAD_CODE_RUN));
        assert!(!flags.contains(PackageFlags::ENTRY_CODE_RUN));
        assert_eq!((entries.get(), unloads.get()), (2, 2));

        let err = f.package.run_before_unload_code().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExecuted);
    }

    #[tokio::test]
    async fn test_trust_denied_blocks_native() {
        let native = MockNativeHost::default().with_library("demo", MockLibrary::ok());
        let invocations = Rc::clone(&native.invocations);
        let mut f = native_fixture(MockTrust::pending(2, false), native);

        let err = f.package.load_package().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessDenied);
        let flags = f.package.flags();
        assert!(!flags.contains(PackageFlags::NATIVE_PACK_LOADED));
        assert!(!flags.contains(PackageFlags::CODE_BASE_LOADED));
        assert!(invocations.borrow().is_empty());
        assert_eq!(f.host.borrow().calls_to("CorePackageLoaded"), 0);
    }

    #[tokio::test]
    async fn test_trusted_native_module_runs_entry() {
        let native = MockNativeHost::default().with_library("demo", MockLibrary::ok());
        let invocations = Rc::clone(&native.invocations);
        let mut f = native_fixture(MockTrust::pending(1, true), native);

        f.package.load_package().await.unwrap();
        assert!(f.package.flags().contains(PackageFlags::NATIVE_PACK_LOADED));
        assert!(f.package.has_native_module());
        assert_eq!(
            invocations.borrow().as_slice(),
            &[("demo".to_string(), "PackageEntry".to_string(), "Main".to_string())]
        );

        f.package.destroy();
        assert!(!f.package.has_native_module());
        assert!(!f.package.flags().contains(PackageFlags::NATIVE_PACK_LOADED));
    }

    #[tokio::test]
    async fn test_native_entry_failures() {
        let cases = [
            (None, ErrorKind::FileNotFound),
            (Some(MockLibrary { has_type: false, ..MockLibrary::ok() }), ErrorKind::ClassNotFound),
            (Some(MockLibrary { has_method: false, ..MockLibrary::ok() }), ErrorKind::FunctionNotFound),
            (Some(MockLibrary { status: 3, ..MockLibrary::ok() }), ErrorKind::ExecutionFailed),
        ];
        for (lib, expected) in cases {
            let mut native = MockNativeHost::default();
            if let Some(lib) = lib {
                native = native.with_library("demo", lib);
            }
            let mut f = native_fixture(MockTrust::trusted(), native);
            let err = f.package.load_code_base().await.unwrap_err();
            assert_eq!(err.kind(), expected);
            assert_eq!(f.package.state(), LifecycleState::NotLoaded);
            assert!(!f.package.has_native_module());
        }
    }

    #[test]
    fn test_policy_flags_are_sticky() {
        let mut f = fixture(PackageKind::Module, &[]);
        let flags = f.package.set_flags(PackageFlags::SYSTEM_PACKAGE).unwrap();
        assert!(flags.contains(PackageFlags::NOT_UNLOADABLE));

        let flags = f.package.set_flags(PackageFlags::empty()).unwrap();
        assert!(flags.contains(PackageFlags::SYSTEM_PACKAGE | PackageFlags::NOT_UNLOADABLE));

        let flags = f.package.set_flags(PackageFlags::CODE_BASE_LOADED).unwrap();
        assert!(!flags.contains(PackageFlags::CODE_BASE_LOADED));
    }

    struct Recording {
        name: String,
        log: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl ScopedHandler for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn dispose(&self) -> Result<(), HandlerError> {
            self.log.borrow_mut().push(self.name.clone());
            if self.fail {
                return Err(HandlerError::DisposeFailed {
                    name: self.name.clone(),
                    reason: "boom".into(),
                });
            }
            Ok(())
        }

        fn is_disposed(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_destroy_tears_down_in_order() {
        let mut f = fixture(PackageKind::Module, &[("Scripts/Door.lua", "class Door")]);
        f.host.borrow_mut().define("Door.OnDestroy", |_| Ok(Value::Null));
        let unloads = Rc::new(Cell::new(0));
        f.package
            .set_entry(PackageEntry {
                on_load: None,
                on_before_unload: Some(counting_hook(&unloads, true)),
            })
            .unwrap();
        f.package.load_package().await.unwrap();
        f.package.attach_object_host("front", "Door").unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        for (name, fail) in [("first", true), ("second", false)] {
            let handler = Recording {
                name: name.into(),
                log: Rc::clone(&log),
                fail,
            };
            f.package.register_handler(Rc::new(handler)).unwrap();
        }

        f.package.destroy();
        f.package.destroy();

        assert_eq!(unloads.get(), 1);
        assert_eq!(log.borrow().as_slice(), ["first", "second"]);
        assert_eq!(f.host.borrow().calls_to("Door.OnDestroy"), 1);
        assert!(f.package.find_object_host("front").is_none());
        assert_eq!(f.package.handler_count(), 0);
        assert_eq!(f.package.status(), PackageStatus::Destroyed);
        assert_eq!(f.package.to_string(), "Package: demo(3) => destroyed");

        assert_eq!(f.package.require_class("Door").unwrap_err().kind(), ErrorKind::Destroyed);
        assert_eq!(f.package.load_package().await.unwrap_err().kind(), ErrorKind::Destroyed);
        assert_eq!(f.package.get_text_asset("x").unwrap_err().kind(), ErrorKind::Destroyed);
        assert_eq!(f.package.version(), 3);
    }

    #[test]
    fn test_every_mutation_after_destroy_reports_destroyed() {
        let mut f = fixture(PackageKind::Asset, &[("icon.png", "png")]);
        let id = f
            .package
            .register_handler(Rc::new(CallbackHandler::new("cb")))
            .unwrap();
        f.package.destroy();

        let kinds = [
            f.package.get_asset_bytes("icon.png").unwrap_err().kind(),
            f.package.get_text_asset("icon.png").unwrap_err().kind(),
            f.package.get_code_asset("main").unwrap_err().kind(),
            f.package.list_resources().unwrap_err().kind(),
            f.package.detach_object_host("l1").unwrap_err().kind(),
            f.package.unregister_handler(id).err().unwrap().kind(),
            f.package.add_custom_prop("k", json!(1)).unwrap_err().kind(),
        ];
        assert!(kinds.iter().all(|k| *k == ErrorKind::Destroyed), "{kinds:?}");
        assert_eq!(f.package.name(), "demo");
    }

    #[test]
    fn test_destroy_before_load_skips_unload_hook() {
        let mut f = fixture(PackageKind::Module, &[]);
        let unloads = Rc::new(Cell::new(0));
        f.package
            .set_entry(PackageEntry {
                on_load: None,
                on_before_unload: Some(counting_hook(&unloads, true)),
            })
            .unwrap();
        f.package.destroy();
        assert_eq!(unloads.get(), 0);
    }

    #[tokio::test]
    async fn test_script_classes_and_files() {
        let mut f = fixture(
            PackageKind::Module,
            &[("Scripts/Player.lua", "class Player"), ("Config.lua", r#"return {"speed": 4}"#)],
        );
        let a = f.package.require_class("Player").unwrap();
        let b = f.package.require_class("Player").unwrap();
        assert_eq!(a, b);
        assert_eq!(f.package.require_file("Config", true).unwrap(), json!({"speed": 4}));
        assert_eq!(f.host.borrow().executed.len(), 2);

        let other = fixture(PackageKind::Asset, &[("Shared.lua", "return 7")]);
        assert_eq!(f.package.require_file_from(&other.package, "Shared", true).unwrap(), json!(7));
        assert!(f.package.require_file("Shared", true).is_err());

        assert_eq!(f.package.get_code_asset("Player").unwrap().relative_path, "Scripts/Player.lua");
        assert_eq!(
            f.package.list_resources().unwrap(),
            vec!["Config.lua", "Scripts/Player.lua"]
        );
    }

    #[tokio::test]
    async fn test_functions_need_code_base() {
        let mut f = fixture(PackageKind::Module, &[]);
        f.host.borrow_mut().define("Greet", |args| Ok(json!(format!("hi {}", args[0]))));

        assert_eq!(f.package.call_function("Greet", &[]).unwrap_err().kind(), ErrorKind::NotLoaded);

        f.package.load_package().await.unwrap();
        assert_eq!(f.package.call_function("Greet", &[json!(1)]).unwrap(), json!("hi 1"));
        assert!(f.package.get_function("Greet").unwrap().is_some());
        assert!(f.package.get_function("Missing").unwrap().is_none());
        assert_eq!(f.package.try_call_function("Missing").unwrap(), None);
        assert_eq!(
            f.package.call_function("Missing", &[]).unwrap_err().kind(),
            ErrorKind::FunctionNotFound
        );
    }

    #[tokio::test]
    async fn test_object_hosts() {
        let mut f = fixture(PackageKind::Module, &[("Lamp.lua", "class Lamp")]);
        f.host.borrow_mut().define("Lamp.Toggle", |args| Ok(json!([args[0]["name"], args[1]])));

        f.package.attach_object_host("l1", "Lamp").unwrap();
        assert_eq!(f.package.find_object_host("l1").unwrap().class_name(), "Lamp");
        assert_eq!(
            f.package.call_object_function("l1", "Toggle", &[json!(true)]).unwrap(),
            json!(["l1", true])
        );
        assert_eq!(
            f.package.call_object_function("l2", "Toggle", &[]).unwrap_err().kind(),
            ErrorKind::NotLoaded
        );
        assert_eq!(
            f.package.attach_object_host("x", "Ghost").unwrap_err().kind(),
            ErrorKind::MissingReference
        );

        assert!(f.package.detach_object_host("l1").unwrap());
        assert!(!f.package.detach_object_host("l1").unwrap());
    }

    #[test]
    fn test_custom_props() {
        let mut f = fixture(PackageKind::Asset, &[]);
        assert!(f.package.add_custom_prop("color", json!("red")).unwrap());
        assert!(!f.package.add_custom_prop("color", json!("blue")).unwrap());
        assert_eq!(f.package.set_custom_prop("color", json!("green")).unwrap(), Some(json!("red")));
        assert_eq!(f.package.set_custom_prop("size", json!(1)).unwrap(), None);
        assert!(f.package.get_custom_prop("size").is_none());
        assert_eq!(f.package.remove_custom_prop("color").unwrap(), Some(json!("green")));
    }

    struct LineLocalizer {
        loaded: RefCell<Vec<String>>,
    }

    impl Localizer for LineLocalizer {
        fn load_language_resources(&self, text: &str) -> bool {
            self.loaded.borrow_mut().push(text.to_string());
            true
        }

        fn preload_language_resources(&self, text: &str) -> HashMap<String, String> {
            text.lines()
                .filter_map(|l| l.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_language_resources() {
        let host = Rc::new(RefCell::new(MockScriptHost::new()));
        let localizer = Rc::new(LineLocalizer {
            loaded: RefCell::new(Vec::new()),
        });
        let env = PackageEnv::new(
            test_settings(),
            host.clone(),
            Rc::new(MockTrust::trusted()),
            Rc::new(MockNativeHost::default()),
        )
        .with_localizer(localizer.clone());
        let mut f = fixture_with_env(
            PackageKind::Asset,
            &[
                (LANGUAGE_RES_PRELOAD_FILE, "title=Demo\nbye=Ciao"),
                (LANGUAGE_RES_FILE, "<strings/>"),
            ],
            host,
            Rc::new(env),
        );

        assert_eq!(f.package.localized_string("title"), Some("Demo"));
        assert_eq!(f.package.localized_string("missing"), None);
        assert!(localizer.loaded.borrow().is_empty());

        f.package.load_package().await.unwrap();
        assert_eq!(localizer.loaded.borrow().as_slice(), ["<strings/>"]);
    }

    #[test]
    fn test_handlers_register_and_unregister() {
        let mut f = fixture(PackageKind::Asset, &[]);
        let id = f
            .package
            .register_handler(Rc::new(CallbackHandler::new("cb")))
            .unwrap();
        assert_eq!(f.package.handler_count(), 1);
        assert!(f.package.unregister_handler(id).unwrap().is_some());
        assert_eq!(f.package.handler_count(), 0);
    }

    #[test]
    fn test_load_info_records_path() {
        let mut f = fixture(PackageKind::Asset, &[]);
        f.package.load_info("/pkgs/demo/PackageDef.yaml").unwrap();
        assert_eq!(
            f.package.manifest_path(),
            Some(Path::new("/pkgs/demo/PackageDef.yaml"))
        );
        assert_eq!(f.package.to_string(), "Package: demo(3) => registered");
    }
}
