//! Package lifecycle state machine and flag view.
//!
//! ```text
//! NotLoaded -> CodeLoading -> CodeLoaded -> EntryRun <-> UnloadRun -> Destroyed
//!                  |              |                          ^
//!                  +-> NotLoaded  +--------------------------+
//! ```
//!
//! Any state may move to `Destroyed`; nothing leaves it.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use packrt_core::PackageError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotLoaded,
    CodeLoading,
    CodeLoaded,
    EntryRun,
    UnloadRun,
    Destroyed,
}

impl LifecycleState {
    pub fn is_code_loaded(self) -> bool {
        matches!(self, Self::CodeLoaded | Self::EntryRun | Self::UnloadRun)
    }

    /// Lifecycle bits implied by this state.
    pub fn flags(self) -> PackageFlags {
        match self {
            Self::NotLoaded | Self::CodeLoading | Self::Destroyed => PackageFlags::empty(),
            Self::CodeLoaded => PackageFlags::CODE_BASE_LOADED,
            Self::EntryRun => PackageFlags::CODE_BASE_LOADED | PackageFlags::ENTRY_CODE_RUN,
            Self::UnloadRun => PackageFlags::CODE_BASE_LOADED | PackageFlags::UNLOAD_CODE_RUN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BeginCodeLoad,
    FinishCodeLoad,
    AbortCodeLoad,
    RunEntry,
    RunUnload,
    Destroy,
}

/// Why a transition was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    AlreadyInitialized,
    AlreadyExecuted(&'static str),
    NotLoaded(&'static str),
    Destroyed,
}

impl TransitionError {
    pub fn into_package_error(self, package: &str) -> PackageError {
        match self {
            Self::AlreadyInitialized => PackageError::AlreadyInitialized(package.to_string()),
            Self::AlreadyExecuted(stage) => PackageError::AlreadyExecuted {
                package: package.to_string(),
                stage,
            },
            Self::NotLoaded(what) => PackageError::NotLoaded {
                package: package.to_string(),
                what: what.to_string(),
            },
            Self::Destroyed => PackageError::Destroyed(package.to_string()),
        }
    }
}

/// Applies `event` to `state`.
pub fn transition(state: LifecycleState, event: Transition) -> Result<LifecycleState, TransitionError> {
    use LifecycleState::*;
    use Transition::*;

    match (state, event) {
        (_, Destroy) => Ok(Destroyed),
        (Destroyed, _) => Err(TransitionError::Destroyed),

        (NotLoaded, BeginCodeLoad) => Ok(CodeLoading),
        (_, BeginCodeLoad) => Err(TransitionError::AlreadyInitialized),
        (CodeLoading, FinishCodeLoad) => Ok(CodeLoaded),
        (CodeLoading, AbortCodeLoad) => Ok(NotLoaded),
        (_, FinishCodeLoad | AbortCodeLoad) => Err(TransitionError::NotLoaded("pending code load")),

        (CodeLoaded | UnloadRun, RunEntry) => Ok(EntryRun),
        (EntryRun, RunEntry) => Err(TransitionError::AlreadyExecuted("entry")),
        (CodeLoaded | EntryRun, RunUnload) => Ok(UnloadRun),
        (UnloadRun, RunUnload) => Err(TransitionError::AlreadyExecuted("unload")),
        (NotLoaded | CodeLoading, RunEntry | RunUnload) => {
            Err(TransitionError::NotLoaded("code base"))
        }
    }
}

/// Bitmask view over a package's lifecycle and policy state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackageFlags(u32);

impl PackageFlags {
    pub const CODE_BASE_LOADED: Self = Self(0x01);
    pub const SCRIPT_PACK_LOADED: Self = Self(0x02);
    pub const NATIVE_PACK_LOADED: Self = Self(0x04);
    pub const ENTRY_CODE_RUN: Self = Self(0x08);
    pub const UNLOAD_CODE_RUN: Self = Self(0x10);
    pub const NOT_UNLOADABLE: Self = Self(0x20);
    pub const SYSTEM_PACKAGE: Self = Self(0x40);

    /// Bits owned by the lifecycle; read-only to callers.
    pub const LIFECYCLE: Self = Self(0x1F);
    /// Bits callers may set.
    pub const POLICY: Self = Self(0x60);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::CODE_BASE_LOADED, "CODE_BASE_LOADED"),
        (Self::SCRIPT_PACK_LOADED, "SCRIPT_PACK_LOADED"),
        (Self::NATIVE_PACK_LOADED, "NATIVE_PACK_LOADED"),
        (Self::ENTRY_CODE_RUN, "ENTRY_CODE_RUN"),
        (Self::UNLOAD_CODE_RUN, "UNLOAD_CODE_RUN"),
        (Self::NOT_UNLOADABLE, "NOT_UNLOADABLE"),
        (Self::SYSTEM_PACKAGE, "SYSTEM_PACKAGE"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x7F)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for PackageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PackageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PackageFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for PackageFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self::from_bits_truncate(!self.0)
    }
}

impl fmt::Debug for PackageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("PackageFlags(empty)")
        } else {
            write!(f, "PackageFlags({})", names.join(" | "))
        }
    }
}

/// Coarse load status shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Registered,
    Loading,
    Loaded,
    LoadFailed,
    Destroyed,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}
