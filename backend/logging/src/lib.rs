//! Logging components for the package runtime.
//!
//! Subscriber bootstrap with optional rolling JSON file output, structured
//! package lifecycle events, and the byte dump used by loader diagnostics.

pub mod hexdump;
pub mod lifecycle_log;
pub mod logger;

pub use hexdump::{hex_dump, MAX_DUMP_BYTES};
pub use lifecycle_log::{LifecycleEvent, LifecycleLogEntry, LifecycleLogger};
pub use logger::{init_from_config, init_logger};
