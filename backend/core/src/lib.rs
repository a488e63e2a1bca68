pub mod emitter;
pub mod error;
pub mod handler;
pub mod last_error;

pub use emitter::{EventEmitter, EventEmitterStorage, Listener, SubscriberHandle};
pub use error::{ErrorKind, IncompatibleManifest, PackageError, PackageResult};
pub use handler::{CallbackHandler, HandlerError, HandlerId, HandlerRegistry, ScopedHandler};
pub use last_error::{clear_last_error, last_error, record, record_and_log, set_last_error};
