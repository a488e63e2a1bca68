//! Package table: registration, dependency-ordered loading and unloading.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use packrt_config::RuntimeConfig;
use packrt_core::{EventEmitter, PackageError, PackageResult, SubscriberHandle, record_and_log};
use packrt_logging::{LifecycleEvent, LifecycleLogger};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{LoaderSettings, PackageEnv};
use crate::host::{Localizer, SharedScriptHost, TrustAuthority};
use crate::lifecycle::PackageFlags;
use crate::manifest::{find_manifest, read_manifest};
use crate::native::NativeModuleHost;
use crate::package::Package;
use crate::resources::DirectoryContainer;

const TAG: &str = "PackageManager";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageEventKind {
    Registered,
    Loaded,
    LoadFailed,
    Unloaded,
}

impl PackageEventKind {
    pub const ALL: [Self; 4] = [Self::Registered, Self::Loaded, Self::LoadFailed, Self::Unloaded];

    pub fn event_name(self) -> &'static str {
        match self {
            Self::Registered => "package_registered",
            Self::Loaded => "package_loaded",
            Self::LoadFailed => "package_load_failed",
            Self::Unloaded => "package_unloaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageEvent {
    pub name: String,
    pub kind: PackageEventKind,
}

/// Owns every package of the runtime.
pub struct PackageManager {
    env: Rc<PackageEnv>,
    core_name: String,
    system_name: String,
    packages_dir: PathBuf,
    packages: HashMap<String, Package>,
    /// Names in the order their load completed.
    load_order: Vec<String>,
    events: EventEmitter<PackageEvent>,
}

impl PackageManager {
    pub fn new(
        config: &RuntimeConfig,
        script_host: SharedScriptHost,
        trust: Rc<dyn TrustAuthority>,
        native_host: Rc<dyn NativeModuleHost>,
    ) -> Self {
        let settings = LoaderSettings::from_config(config);
        let mut events = EventEmitter::new(TAG);
        for kind in PackageEventKind::ALL {
            events.register_event(kind.event_name());
        }
        Self {
            env: Rc::new(PackageEnv::new(settings, script_host, trust, native_host)),
            core_name: config.core_package_name().to_string(),
            system_name: config.system_package_name().to_string(),
            packages_dir: config.packages_dir().to_path_buf(),
            packages: HashMap::new(),
            load_order: Vec::new(),
            events,
        }
    }

    /// Replaces the localizer. Applies to packages registered afterwards.
    pub fn with_localizer(mut self, localizer: Rc<dyn Localizer>) -> Self {
        let env = PackageEnv::new(
            self.env.settings.clone(),
            Rc::clone(&self.env.script_host),
            Rc::clone(&self.env.trust),
            Rc::clone(&self.env.native),
        )
        .with_localizer(localizer);
        self.env = Rc::new(env);
        self
    }

    /// Collaborators shared with packages built outside the manager.
    pub fn env(&self) -> Rc<PackageEnv> {
        Rc::clone(&self.env)
    }

    pub fn events(&self) -> &EventEmitter<PackageEvent> {
        &self.events
    }

    pub fn subscribe(
        &mut self,
        kind: PackageEventKind,
        f: impl Fn(&PackageEvent) + 'static,
    ) -> SubscriberHandle<PackageEvent> {
        self.events.register_event(kind.event_name()).subscribe(f)
    }

    fn emit(&self, name: &str, kind: PackageEventKind) {
        let event = PackageEvent {
            name: name.to_string(),
            kind,
        };
        self.events.emit_event(kind.event_name(), &event);
    }

    // ---- registration ----

    /// Parses the manifest at `path` and registers a package rooted at its
    /// directory. Returns the package name.
    pub async fn register_manifest(&mut self, path: &Path) -> PackageResult<String> {
        let descriptor = read_manifest(path, self.env.settings.build_version)
            .await
            .map_err(|e| record_and_log(TAG, e))?;
        let root = path.parent().unwrap_or_else(|| Path::new("."));
        let mut package = Package::new(
            descriptor,
            Some(Box::new(DirectoryContainer::new(root))),
            Rc::clone(&self.env),
        );
        package.load_info(path)?;

        let name = package.name().to_string();
        self.register(package)?;
        Ok(name)
    }

    /// Registers every package directory under `dir` that holds a manifest.
    ///
    /// Packages that fail to register are logged and skipped.
    pub async fn discover(&mut self, dir: &Path) -> PackageResult<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() {
                candidates.push(path);
            }
        }
        candidates.sort();

        let mut registered = Vec::new();
        for package_dir in candidates {
            let Some(manifest) = find_manifest(&package_dir) else {
                debug!(dir = %package_dir.display(), "no manifest, skipping");
                continue;
            };
            match self.register_manifest(&manifest).await {
                Ok(name) => registered.push(name),
                Err(e) => {
                    warn!(manifest = %manifest.display(), error = %e, "failed to register package");
                }
            }
        }
        info!(dir = %dir.display(), count = registered.len(), "package discovery finished");
        Ok(registered)
    }

    /// [`PackageManager::discover`] on the configured packages directory.
    pub async fn discover_configured(&mut self) -> PackageResult<Vec<String>> {
        let dir = self.packages_dir.clone();
        self.discover(&dir).await
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Adds a package built by the caller.
    pub fn register(&mut self, mut package: Package) -> PackageResult<()> {
        let name = package.name().to_string();
        if self.packages.contains_key(&name) {
            return Err(record_and_log(TAG, PackageError::AlreadyRegistered(name)));
        }

        let mut policy = package.flags() & PackageFlags::POLICY;
        if name == self.system_name {
            policy |= PackageFlags::SYSTEM_PACKAGE;
        }
        if name == self.core_name {
            policy |= PackageFlags::NOT_UNLOADABLE;
        }
        package.set_flags(policy)?;

        LifecycleLogger::log_event(
            &name,
            LifecycleEvent::Registered {
                version: package.version(),
            },
        );
        self.packages.insert(name.clone(), package);
        self.emit(&name, PackageEventKind::Registered);
        Ok(())
    }

    // ---- loading ----

    /// Loads `name` after its dependencies.
    ///
    /// Dependencies loaded on behalf of `name` are unloaded again once the
    /// last package depending on them goes away.
    pub async fn load(&mut self, name: &str) -> PackageResult<()> {
        let plan = self.plan_load(name).map_err(|e| record_and_log(TAG, e))?;
        debug!(package = name, plan = ?plan, "load plan");

        for current in &plan {
            let is_target = current == name;
            if self.packages.get(current).is_some_and(Package::is_loaded) {
                continue;
            }

            let edges = self.resolved_dependencies(current)?;
            for dep in &edges {
                if let Some(p) = self.packages.get_mut(dep) {
                    p.deps.acquire();
                }
            }

            let result = match self.packages.get_mut(current) {
                Some(package) => package.load_package().await,
                None => Err(not_registered(current)),
            };

            match result {
                Ok(()) => {
                    if let Some(package) = self.packages.get_mut(current) {
                        package.acquired = edges;
                        if !is_target {
                            package.deps.unload_when_dependency_ref_none = true;
                        }
                    }
                    self.load_order.push(current.clone());
                    self.emit(current, PackageEventKind::Loaded);
                }
                Err(e) => {
                    self.emit(current, PackageEventKind::LoadFailed);
                    self.release_edges(&edges);
                    return Err(e);
                }
            }
        }

        if let Some(package) = self.packages.get_mut(name) {
            package.deps.unload_when_dependency_ref_none = false;
        }
        Ok(())
    }

    /// Depth-first load order ending with `name`.
    fn plan_load(&self, name: &str) -> PackageResult<Vec<String>> {
        let mut order = Vec::new();
        let mut stack = Vec::new();
        let mut done = HashSet::new();
        self.visit(name, &mut stack, &mut done, &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> PackageResult<()> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(PackageError::DependencyCycle(cycle));
        }

        stack.push(name.to_string());
        for dep in self.resolved_dependencies(name)? {
            self.visit(&dep, stack, done, order)?;
        }
        stack.pop();

        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    /// Registered dependencies of `name` that satisfy their version bound.
    fn resolved_dependencies(&self, name: &str) -> PackageResult<Vec<String>> {
        let package = self.packages.get(name).ok_or_else(|| not_registered(name))?;
        let mut resolved = Vec::new();
        for spec in package.descriptor().dependencies() {
            let reason = match self.packages.get(&spec.name) {
                Some(dep) if dep.version() >= spec.min_version => {
                    resolved.push(spec.name.clone());
                    continue;
                }
                Some(dep) => format!(
                    "version {} is older than required {}",
                    dep.version(),
                    spec.min_version
                ),
                None => "dependency is not registered".to_string(),
            };
            if spec.must_load {
                return Err(PackageError::MissingReference {
                    package: name.to_string(),
                    name: spec.name.clone(),
                    reason,
                });
            }
            warn!(package = name, dependency = %spec.name, %reason, "optional dependency skipped");
        }
        Ok(resolved)
    }

    /// Runs the entry code of a loaded package.
    pub fn run(&mut self, name: &str) -> PackageResult<()> {
        match self.packages.get_mut(name) {
            Some(package) => package.run_execution_code(),
            None => Err(record_and_log(TAG, not_registered(name))),
        }
    }

    // ---- unloading ----

    /// Destroys `name` and removes it from the table.
    pub fn unload(&mut self, name: &str) -> PackageResult<()> {
        let package = self
            .packages
            .get(name)
            .ok_or_else(|| record_and_log(TAG, not_registered(name)))?;
        if package.flags().contains(PackageFlags::NOT_UNLOADABLE) {
            return Err(record_and_log(TAG, PackageError::NotUnloadable(name.to_string())));
        }
        let ref_count = package.deps.count();
        if ref_count > 0 {
            return Err(record_and_log(
                TAG,
                PackageError::InUse {
                    package: name.to_string(),
                    ref_count,
                },
            ));
        }

        self.remove_package(name);
        Ok(())
    }

    fn remove_package(&mut self, name: &str) {
        let Some(mut package) = self.packages.remove(name) else {
            return;
        };
        package.destroy();
        let edges = std::mem::take(&mut package.acquired);
        drop(package);

        self.load_order.retain(|n| n != name);
        LifecycleLogger::log_event(name, LifecycleEvent::Unloaded);
        self.emit(name, PackageEventKind::Unloaded);
        self.release_edges(&edges);
    }

    /// Drops one reference per edge, unloading dependencies nobody needs.
    fn release_edges(&mut self, edges: &[String]) {
        for dep in edges {
            let Some(package) = self.packages.get_mut(dep) else {
                continue;
            };
            package.deps.release();
            if package.deps.should_auto_unload()
                && !package.flags().contains(PackageFlags::NOT_UNLOADABLE)
            {
                info!(package = %dep, "unloading dependency no longer in use");
                self.remove_package(dep);
            }
        }
    }

    /// Destroys every package, dependents before their dependencies.
    pub fn shutdown(&mut self) {
        if self.packages.is_empty() {
            return;
        }
        let mut order: Vec<String> = self.load_order.drain(..).rev().collect();
        let mut rest: Vec<String> = self
            .packages
            .keys()
            .filter(|n| !order.contains(n))
            .cloned()
            .collect();
        rest.sort();
        order.extend(rest);

        for name in order {
            if let Some(mut package) = self.packages.remove(&name) {
                package.destroy();
                self.emit(&name, PackageEventKind::Unloaded);
            }
        }
        info!("package manager shut down");
    }

    // ---- lookup ----

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.packages.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn core_package(&self) -> Option<&Package> {
        self.packages.get(&self.core_name)
    }

    pub fn system_package(&self) -> Option<&Package> {
        self.packages.get(&self.system_name)
    }
}

impl Drop for PackageManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn not_registered(name: &str) -> PackageError {
    PackageError::NotLoaded {
        package: name.to_string(),
        what: "package".into(),
    }
}
