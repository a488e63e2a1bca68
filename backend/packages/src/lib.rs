//! Package runtime: manifests, lifecycle, code loading and the package manager.

pub mod context;
pub mod deps;
pub mod host;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod native;
pub mod object_host;
pub mod package;
pub mod resources;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{LoaderSettings, PackageEnv};
pub use deps::DependencyTracker;
pub use host::{
    DenyAllTrust, Localizer, NoopLocalizer, ScriptError, ScriptFunction, ScriptFunctionRef, ScriptHost,
    SharedScriptHost, TrustAuthority,
};
pub use lifecycle::{LifecycleState, PackageFlags, PackageStatus, Transition, transition};
pub use manager::{PackageEvent, PackageEventKind, PackageManager};
pub use manifest::{
    BaseInfo, DependencySpec, ManifestFormat, PackageDescriptor, PackageKind, find_manifest,
    parse_manifest, read_manifest,
};
pub use native::{
    EntryLookupError, LibloadingHost, NativeLoadError, NativeModule, NativeModuleHost,
    RuntimeContext,
};
pub use object_host::ScriptObjectHost;
pub use package::{EntryHook, Package, PackageEntry};
pub use resources::{CodeAsset, DirectoryContainer, ResourceContainer};
