//! Package lifecycle event log.
//!
//! Lifecycle transitions are written under the `package_events` target so
//! they can be filtered apart from the rest of the runtime log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Registered { version: u32 },
    LoadStarted,
    Loaded { native: bool },
    LoadFailed { error: String },
    TrustRequested,
    TrustDenied,
    EntryRun { ok: bool },
    UnloadRun { ok: bool },
    Destroyed,
    Unloaded,
}

impl LifecycleEvent {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::LoadFailed { .. }
                | Self::TrustDenied
                | Self::EntryRun { ok: false }
                | Self::UnloadRun { ok: false }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct LifecycleLogEntry {
    pub package: String,
    pub timestamp: DateTime<Utc>,
    pub event: LifecycleEvent,
}

impl LifecycleLogEntry {
    pub fn new(package: &str, event: LifecycleEvent) -> Self {
        Self {
            package: package.to_string(),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

pub struct LifecycleLogger;

impl LifecycleLogger {
    pub fn log_event(package: &str, event: LifecycleEvent) {
        let entry = LifecycleLogEntry::new(package, event);
        let json = entry.to_json();
        if entry.event.is_failure() {
            warn!(target: "package_events", package = %entry.package, entry = %json, "package lifecycle event");
        } else {
            info!(target: "package_events", package = %entry.package, entry = %json, "package lifecycle event");
        }
    }
}
