//! Inbound dependency reference counting.

use tracing::error;

/// Counts how many loaded packages depend on this one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyTracker {
    ref_count: usize,
    /// Set when the package was loaded only to satisfy a dependent.
    pub unload_when_dependency_ref_none: bool,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> usize {
        self.ref_count += 1;
        self.ref_count
    }

    /// Drops one reference. Releasing an unreferenced package is a bug.
    pub fn release(&mut self) -> usize {
        debug_assert!(self.ref_count > 0, "dependency released more often than acquired");
        if self.ref_count == 0 {
            error!("dependency ref count released below zero, clamping");
            return 0;
        }
        self.ref_count -= 1;
        self.ref_count
    }

    pub fn count(&self) -> usize {
        self.ref_count
    }

    /// Whether the package should be destroyed now that nothing uses it.
    pub fn should_auto_unload(&self) -> bool {
        self.ref_count == 0 && self.unload_when_dependency_ref_none
    }
}
