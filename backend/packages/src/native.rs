//! Native module loading.
//!
//! A native package ships one shared library named after the package
//! (`libdemo.so`, `demo.dll`, ...). The library exports:
//!
//! - `{Type}_ABI_VERSION`: marker symbol announcing the entry type;
//! - `extern "C" fn {Type}_{Method}(*const RuntimeContext) -> i32`: the entry
//!   point, returning 0 on success.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NativeLoadError {
    #[error("native module not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot open native module {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryLookupError {
    #[error("entry type `{0}` not exported")]
    TypeNotFound(String),

    #[error("entry method `{0}` not exported")]
    MethodNotFound(String),
}

/// Token handed to native entry points.
///
/// Native code must treat the pointer as opaque.
#[derive(Debug)]
pub struct RuntimeContext {
    package: CString,
    version: u32,
}

impl RuntimeContext {
    pub fn new(package: &str, version: u32) -> Self {
        // Interior NULs cannot cross the C boundary; keep the prefix.
        let bytes: Vec<u8> = package.bytes().take_while(|b| *b != 0).collect();
        Self {
            package: CString::new(bytes).unwrap_or_default(),
            version,
        }
    }

    pub fn package(&self) -> &str {
        self.package.to_str().unwrap_or_default()
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Signature of the exported entry function.
pub type NativeEntryFn = unsafe extern "C" fn(*const RuntimeContext) -> i32;

pub trait NativeModule {
    /// Runs `{entry_type}_{method}` and returns its status code.
    fn invoke_entry(
        &self,
        entry_type: &str,
        method: &str,
        ctx: &RuntimeContext,
    ) -> Result<i32, EntryLookupError>;
}

pub trait NativeModuleHost {
    /// Locates the library of package `name` under `root`.
    fn resolve(&self, root: &Path, name: &str) -> Result<PathBuf, NativeLoadError> {
        let path = root.join(libloading::library_filename(name));
        if path.is_file() {
            Ok(path)
        } else {
            Err(NativeLoadError::NotFound(path))
        }
    }

    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, NativeLoadError>;
}

/// Loads modules with the platform dynamic loader.
#[derive(Debug, Default)]
pub struct LibloadingHost;

impl NativeModuleHost for LibloadingHost {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, NativeLoadError> {
        // SAFETY: loading runs the library's initializers. Only packages that
        // passed the trust gate reach this point.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| NativeLoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "native module opened");
        Ok(Box::new(LibraryModule { library }))
    }
}

struct LibraryModule {
    library: libloading::Library,
}

impl NativeModule for LibraryModule {
    fn invoke_entry(
        &self,
        entry_type: &str,
        method: &str,
        ctx: &RuntimeContext,
    ) -> Result<i32, EntryLookupError> {
        let marker = format!("{entry_type}_ABI_VERSION");
        // SAFETY: the marker is only looked up, never read.
        let has_type = unsafe { self.library.get::<*const u32>(marker.as_bytes()) }.is_ok();
        if !has_type {
            return Err(EntryLookupError::TypeNotFound(entry_type.to_string()));
        }

        let symbol = format!("{entry_type}_{method}");
        // SAFETY: the exported function must match `NativeEntryFn`.
        let entry = unsafe { self.library.get::<NativeEntryFn>(symbol.as_bytes()) }
            .map_err(|_| EntryLookupError::MethodNotFound(method.to_string()))?;
        // SAFETY: `ctx` outlives the call.
        Ok(unsafe { entry(ctx as *const RuntimeContext) })
    }
}
