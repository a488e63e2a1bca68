use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`PackageError`].
///
/// This is what the last-error side channel stores, so callers that do not
/// want to match on the rich error can still tell failures apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingAttribute,
    InvalidManifest,
    PackageIncompatible,
    AccessDenied,
    ClassNotFound,
    FunctionNotFound,
    ExecutionFailed,
    FileNotFound,
    MissingReference,
    EmptyFile,
    AlreadyRegistered,
    AlreadyInitialized,
    AlreadyExecuted,
    WrongPackageKind,
    NotLoaded,
    Destroyed,
    NotUnloadable,
    InUse,
    DependencyCycle,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

/// Summary of a manifest that failed the compatibility gate.
///
/// Only the fields read before the gate are present; entry code, kind and
/// native-code flag are never looked at for an incompatible package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatibleManifest {
    pub name: String,
    pub version: u32,
    pub target_version: u32,
    pub min_version: u32,
    pub build_version: u32,
}

impl IncompatibleManifest {
    pub fn is_compatible(&self) -> bool {
        self.min_version <= self.build_version
    }
}

/// Top-level error type for package loading and lifecycle operations.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("manifest is missing required attribute `{0}`")]
    MissingAttribute(String),

    #[error("manifest could not be parsed: {0}")]
    InvalidManifest(String),

    #[error(
        "package {} requires runtime version >= {}, current build is {}",
        .0.name, .0.min_version, .0.build_version
    )]
    PackageIncompatible(Box<IncompatibleManifest>),

    #[error("loading native code of package {0} was denied")]
    AccessDenied(String),

    #[error("package {package}: native entry type `{class}` not found")]
    ClassNotFound { package: String, class: String },

    #[error("package {package}: native entry function `{function}` not found")]
    FunctionNotFound { package: String, function: String },

    #[error("package {package}: execution failed: {reason}")]
    ExecutionFailed { package: String, reason: String },

    #[error("package {package}: file not found: {path}")]
    FileNotFound { package: String, path: String },

    #[error("package {package}: cannot import `{name}`: {reason}")]
    MissingReference {
        package: String,
        name: String,
        reason: String,
    },

    #[error("package {package}: script `{name}` is empty")]
    EmptyFile { package: String, name: String },

    #[error("package {0} is already registered")]
    AlreadyRegistered(String),

    #[error("package {0}: code base is already initialized")]
    AlreadyInitialized(String),

    #[error("package {package}: {stage} code has already run")]
    AlreadyExecuted { package: String, stage: &'static str },

    #[error("package {package}: `{operation}` is only valid for module packages")]
    WrongPackageKind {
        package: String,
        operation: &'static str,
    },

    #[error("package {package}: {what} is not loaded")]
    NotLoaded { package: String, what: String },

    #[error("package {0} has been destroyed")]
    Destroyed(String),

    #[error("package {0} is not unloadable")]
    NotUnloadable(String),

    #[error("package {package} is still required by {ref_count} dependent(s)")]
    InUse { package: String, ref_count: usize },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PackageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingAttribute(_) => ErrorKind::MissingAttribute,
            Self::InvalidManifest(_) => ErrorKind::InvalidManifest,
            Self::PackageIncompatible(_) => ErrorKind::PackageIncompatible,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::ClassNotFound { .. } => ErrorKind::ClassNotFound,
            Self::FunctionNotFound { .. } => ErrorKind::FunctionNotFound,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::MissingReference { .. } => ErrorKind::MissingReference,
            Self::EmptyFile { .. } => ErrorKind::EmptyFile,
            Self::AlreadyRegistered(_) => ErrorKind::AlreadyRegistered,
            Self::AlreadyInitialized(_) => ErrorKind::AlreadyInitialized,
            Self::AlreadyExecuted { .. } => ErrorKind::AlreadyExecuted,
            Self::WrongPackageKind { .. } => ErrorKind::WrongPackageKind,
            Self::NotLoaded { .. } => ErrorKind::NotLoaded,
            Self::Destroyed(_) => ErrorKind::Destroyed,
            Self::NotUnloadable(_) => ErrorKind::NotUnloadable,
            Self::InUse { .. } => ErrorKind::InUse,
            Self::DependencyCycle(_) => ErrorKind::DependencyCycle,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Incompatibility summary, when this is a [`PackageError::PackageIncompatible`].
    pub fn incompatible_manifest(&self) -> Option<&IncompatibleManifest> {
        match self {
            Self::PackageIncompatible(info) => Some(info),
            _ => None,
        }
    }
}

pub type PackageResult<T> = Result<T, PackageError>;
