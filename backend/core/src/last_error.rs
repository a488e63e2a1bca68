//! Last-error side channel.
//!
//! Every failing package operation records its [`ErrorKind`] here so callers
//! that only need a yes/no answer can still inspect why it failed. The
//! runtime executes on one logical thread, so the slot is thread-local.

use std::cell::Cell;

use tracing::warn;

use crate::error::{ErrorKind, PackageError};

thread_local! {
    static LAST_ERROR: Cell<Option<ErrorKind>> = const { Cell::new(None) };
}

/// Returns the kind of the most recent failure on this thread.
pub fn last_error() -> Option<ErrorKind> {
    LAST_ERROR.with(Cell::get)
}

pub fn set_last_error(kind: ErrorKind) {
    LAST_ERROR.with(|slot| slot.set(Some(kind)));
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| slot.set(None));
}

/// Records `err` in the side channel and hands it back.
pub fn record(err: PackageError) -> PackageError {
    set_last_error(err.kind());
    err
}

/// Records and logs `err` under the given tag, then hands it back.
pub fn record_and_log(tag: &str, err: PackageError) -> PackageError {
    warn!(tag = %tag, kind = %err.kind(), "{err}");
    record(err)
}
