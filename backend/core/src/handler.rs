//! Scoped handler registry.
//!
//! Handlers registered against a package are disposed together when the
//! package is destroyed, in the order they were registered.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler {name} failed to dispose: {reason}")]
    DisposeFailed { name: String, reason: String },
}

/// A resource whose lifetime is tied to the owning package.
pub trait ScopedHandler {
    fn name(&self) -> &str;
    fn dispose(&self) -> Result<(), HandlerError>;
    fn is_disposed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    next_id: u64,
    handlers: BTreeMap<HandlerId, Rc<dyn ScopedHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Rc<dyn ScopedHandler>) -> HandlerId {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        debug!(handler = %handler.name(), id = id.0, "handler registered");
        self.handlers.insert(id, handler);
        id
    }

    /// Removes a handler without disposing it.
    pub fn unregister(&mut self, id: HandlerId) -> Option<Rc<dyn ScopedHandler>> {
        self.handlers.remove(&id)
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.handlers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Disposes and drops every handler, oldest first.
    ///
    /// A failing handler is logged and skipped; the rest are still disposed.
    pub fn dispose_all(&mut self) -> Vec<HandlerError> {
        let handlers = std::mem::take(&mut self.handlers);
        let mut failures = Vec::new();
        for (id, handler) in handlers {
            if handler.is_disposed() {
                continue;
            }
            if let Err(e) = handler.dispose() {
                warn!(handler = %handler.name(), id = id.0, error = %e, "handler dispose failed");
                failures.push(e);
            }
        }
        failures
    }
}

type EventCallback = Rc<dyn Fn(&str, &[Value]) -> bool>;
type CustomCallback = Rc<dyn Fn(&[Value]) -> Value>;

/// Stock handler wrapping an event callback and/or a custom callback.
///
/// Once disposed, `call_event` returns `false` and `call_custom` returns
/// `Value::Bool(false)` without invoking anything.
pub struct CallbackHandler {
    name: String,
    on_event: RefCell<Option<EventCallback>>,
    on_custom: RefCell<Option<CustomCallback>>,
    disposed: Cell<bool>,
}

impl CallbackHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_event: RefCell::new(None),
            on_custom: RefCell::new(None),
            disposed: Cell::new(false),
        }
    }

    pub fn with_event(self, f: impl Fn(&str, &[Value]) -> bool + 'static) -> Self {
        *self.on_event.borrow_mut() = Some(Rc::new(f));
        self
    }

    pub fn with_custom(self, f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        *self.on_custom.borrow_mut() = Some(Rc::new(f));
        self
    }

    pub fn call_event(&self, event: &str, params: &[Value]) -> bool {
        if self.disposed.get() {
            return false;
        }
        // The callback may dispose this handler.
        let callback = self.on_event.borrow().clone();
        match callback {
            Some(f) => f(event, params),
            None => false,
        }
    }

    pub fn call_custom(&self, params: &[Value]) -> Value {
        if self.disposed.get() {
            return Value::Bool(false);
        }
        let callback = self.on_custom.borrow().clone();
        match callback {
            Some(f) => f(params),
            None => Value::Null,
        }
    }
}

impl ScopedHandler for CallbackHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn dispose(&self) -> Result<(), HandlerError> {
        self.disposed.set(true);
        self.on_event.borrow_mut().take();
        self.on_custom.borrow_mut().take();
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}
