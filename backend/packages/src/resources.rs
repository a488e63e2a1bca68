//! Package resource access.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A script payload plus the paths it is known by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAsset {
    pub data: Vec<u8>,
    /// Resolved location; the file cache is keyed by this.
    pub real_path: String,
    pub relative_path: String,
    pub debug_path: String,
}

impl CodeAsset {
    /// Payload as text, without a leading byte order mark.
    pub fn code_string(&self) -> String {
        String::from_utf8_lossy(strip_bom(&self.data)).into_owned()
    }
}

fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(UTF8_BOM).unwrap_or(data)
}

/// Read access to the files shipped with a package.
pub trait ResourceContainer {
    fn load_bytes(&self, path: &str) -> Option<Vec<u8>>;

    fn load_text(&self, path: &str) -> Option<String> {
        self.load_bytes(path)
            .map(|b| String::from_utf8_lossy(strip_bom(&b)).into_owned())
    }

    fn real_path(&self, path: &str) -> Option<String>;

    fn load_code(&self, path: &str) -> Option<CodeAsset> {
        let data = self.load_bytes(path)?;
        let real_path = self.real_path(path).unwrap_or_else(|| path.to_string());
        Some(CodeAsset {
            data,
            debug_path: real_path.clone(),
            real_path,
            relative_path: path.to_string(),
        })
    }

    fn asset_names(&self) -> Vec<String>;

    /// Directory backing the container, when there is one.
    fn root(&self) -> Option<&Path> {
        None
    }

    fn is_loaded(&self) -> bool;

    /// Releases the container. `with_objects` also drops loaded objects.
    fn unload(&mut self, with_objects: bool);
}

/// Serves files from a directory on disk.
#[derive(Debug)]
pub struct DirectoryContainer {
    root: PathBuf,
    loaded: bool,
}

impl DirectoryContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            loaded: true,
        }
    }

    /// Joins `path` under the root. Absolute paths and `..` are rejected.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        if !self.loaded {
            return None;
        }
        let rel = Path::new(path);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            warn!(path, "resource path escapes package root");
            return None;
        }
        Some(self.root.join(rel))
    }
}

impl ResourceContainer for DirectoryContainer {
    fn load_bytes(&self, path: &str) -> Option<Vec<u8>> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return None;
        }
        match std::fs::read(&full) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(path = %full.display(), error = %e, "failed to read resource");
                None
            }
        }
    }

    fn real_path(&self, path: &str) -> Option<String> {
        let full = self.resolve(path)?;
        let real = std::fs::canonicalize(&full).ok()?;
        Some(real.to_string_lossy().into_owned())
    }

    fn asset_names(&self) -> Vec<String> {
        if !self.loaded {
            return Vec::new();
        }
        let mut names = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if let Ok(rel) = path.strip_prefix(&self.root) {
                    names.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        names.sort();
        names
    }

    fn root(&self) -> Option<&Path> {
        self.loaded.then_some(self.root.as_path())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn unload(&mut self, with_objects: bool) {
        debug!(root = %self.root.display(), with_objects, "resource container unloaded");
        self.loaded = false;
    }
}
