//! Event emitter.
//!
//! Each named event owns an [`EventEmitterStorage`]: an arena of subscriber
//! slots linked into a doubly-linked list by slot index. The newest
//! subscriber is the head of the list. Callers get a [`SubscriberHandle`]
//! (slot index plus generation) that can cancel the subscription in O(1)
//! without keeping the storage alive.
//!
//! Dispatch rules:
//! - the head is snapshotted when `emit` starts, so subscribers added while
//!   callbacks run are not visited by that same `emit`;
//! - the `next` link is read before each callback runs, and nodes unlinked
//!   mid-dispatch are skipped, so callbacks may remove any subscriber;
//! - a `once` subscriber is unlinked right after its own invocation;
//! - slots freed during dispatch are recycled only after the outermost
//!   `emit` returns.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

/// Callback type stored by the emitter.
pub type Listener<T> = Rc<dyn Fn(&T)>;

struct Node<T> {
    listener: Listener<T>,
    tag: Option<String>,
    once: bool,
    removed: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Slot<T> {
    generation: u32,
    node: Option<Node<T>>,
}

struct Inner<T> {
    name: String,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    pending_free: Vec<usize>,
    head: Option<usize>,
    len: usize,
    dispatch_depth: usize,
}

impl<T> Inner<T> {
    fn node(&self, index: usize) -> Option<&Node<T>> {
        self.slots.get(index).and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, index: usize) -> Option<&mut Node<T>> {
        self.slots.get_mut(index).and_then(|slot| slot.node.as_mut())
    }

    fn insert_head(&mut self, listener: Listener<T>, tag: Option<String>, once: bool) -> (usize, u32) {
        let node = Node {
            listener,
            tag,
            once,
            removed: false,
            prev: None,
            next: self.head,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].node = Some(node);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                self.slots.len() - 1
            }
        };
        if let Some(old_head) = self.head {
            if let Some(old) = self.node_mut(old_head) {
                old.prev = Some(index);
            }
        }
        self.head = Some(index);
        self.len += 1;
        (index, self.slots[index].generation)
    }

    /// Unlinks one node. Returns false for stale handles and repeat removals.
    fn unlink(&mut self, index: usize, generation: u32) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        if slot.generation != generation {
            return false;
        }
        let Some(node) = slot.node.as_mut() else {
            return false;
        };
        if node.removed {
            return false;
        }
        // The removed node keeps its own `next`, an in-flight dispatch may
        // still be standing on it.
        node.removed = true;
        let (prev, next) = (node.prev, node.next);

        if self.head == Some(index) {
            self.head = next;
        }
        if let Some(prev) = prev {
            if let Some(p) = self.node_mut(prev) {
                p.next = next;
            }
        }
        if let Some(next) = next {
            if let Some(n) = self.node_mut(next) {
                n.prev = prev;
            }
        }
        self.len -= 1;

        if self.dispatch_depth > 0 {
            self.pending_free.push(index);
        } else {
            self.release(index);
        }
        true
    }

    fn release(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
    }

    fn flush_pending(&mut self) {
        while let Some(index) = self.pending_free.pop() {
            self.release(index);
        }
    }

    /// Live nodes matching `pred`, walked from the head.
    fn collect_matching(&self, mut pred: impl FnMut(&Node<T>) -> bool) -> Vec<(usize, u32)> {
        let mut out = Vec::new();
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let Some(node) = self.node(index) else { break };
            cursor = node.next;
            if !node.removed && pred(node) {
                out.push((index, self.slots[index].generation));
            }
        }
        out
    }
}

/// Subscriber list of one named event.
///
/// Cloning yields another reference to the same list.
pub struct EventEmitterStorage<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for EventEmitterStorage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> EventEmitterStorage<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                name: name.into(),
                slots: Vec::new(),
                free: Vec::new(),
                pending_free: Vec::new(),
                head: None,
                len: 0,
                dispatch_depth: 0,
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Number of linked subscribers.
    pub fn len(&self) -> usize {
        self.inner.borrow().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts `listener` at the head of the list.
    pub fn subscribe_with(&self, listener: Listener<T>, tag: Option<&str>, once: bool) -> SubscriberHandle<T> {
        let (index, generation) =
            self.inner
                .borrow_mut()
                .insert_head(listener, tag.map(str::to_string), once);
        trace!(index, generation, once, "subscriber added");
        SubscriberHandle {
            storage: Rc::downgrade(&self.inner),
            index,
            generation,
        }
    }

    pub fn subscribe(&self, f: impl Fn(&T) + 'static) -> SubscriberHandle<T> {
        self.subscribe_with(Rc::new(f), None, false)
    }

    pub fn subscribe_with_tag(&self, f: impl Fn(&T) + 'static, tag: &str) -> SubscriberHandle<T> {
        self.subscribe_with(Rc::new(f), Some(tag), false)
    }

    pub fn once(&self, f: impl Fn(&T) + 'static) -> SubscriberHandle<T> {
        self.subscribe_with(Rc::new(f), None, true)
    }

    /// Invokes every subscriber linked at the time of the call, head first.
    pub fn emit(&self, payload: &T) {
        let mut cursor = {
            let mut inner = self.inner.borrow_mut();
            inner.dispatch_depth += 1;
            inner.head
        };
        let _guard = DispatchGuard { inner: &self.inner };

        while let Some(index) = cursor {
            let step = {
                let inner = self.inner.borrow();
                let Some(node) = inner.node(index) else { break };
                let call = (!node.removed).then(|| {
                    (
                        Rc::clone(&node.listener),
                        node.once,
                        inner.slots[index].generation,
                    )
                });
                (node.next, call)
            };
            cursor = step.0;

            if let Some((listener, once, generation)) = step.1 {
                listener(payload);
                if once {
                    self.inner.borrow_mut().unlink(index, generation);
                }
            }
        }
    }

    /// Removes every subscription of `listener` (pointer identity).
    pub fn unsubscribe(&self, listener: &Listener<T>) -> usize {
        let target = Rc::as_ptr(listener);
        self.remove_where(|node| std::ptr::addr_eq(Rc::as_ptr(&node.listener), target))
    }

    /// Removes every subscription carrying `tag`.
    pub fn unsubscribe_tag(&self, tag: &str) -> usize {
        self.remove_where(|node| node.tag.as_deref() == Some(tag))
    }

    pub fn clear(&self) -> usize {
        let removed = self.remove_where(|_| true);
        self.inner.borrow_mut().head = None;
        removed
    }

    fn remove_where(&self, pred: impl FnMut(&Node<T>) -> bool) -> usize {
        let mut inner = self.inner.borrow_mut();
        let matches = inner.collect_matching(pred);
        matches
            .into_iter()
            .filter(|(index, generation)| inner.unlink(*index, *generation))
            .count()
    }
}

struct DispatchGuard<'a, T> {
    inner: &'a Rc<RefCell<Inner<T>>>,
}

impl<T> Drop for DispatchGuard<'_, T> {
    fn drop(&mut self) {
        let mut inner = self.inner.borrow_mut();
        inner.dispatch_depth -= 1;
        if inner.dispatch_depth == 0 {
            inner.flush_pending();
        }
    }
}

/// Handle to one subscription. Does not keep the storage alive.
pub struct SubscriberHandle<T> {
    storage: Weak<RefCell<Inner<T>>>,
    index: usize,
    generation: u32,
}

impl<T> Clone for SubscriberHandle<T> {
    fn clone(&self) -> Self {
        Self {
            storage: Weak::clone(&self.storage),
            index: self.index,
            generation: self.generation,
        }
    }
}

impl<T> SubscriberHandle<T> {
    /// Unlinks this subscription. Repeat calls and stale handles are no-ops.
    pub fn off(&self) -> bool {
        let Some(inner) = self.storage.upgrade() else {
            return false;
        };
        let removed = inner.borrow_mut().unlink(self.index, self.generation);
        if removed {
            debug!(index = self.index, "subscriber removed");
        }
        removed
    }

    pub fn is_removed(&self) -> bool {
        let Some(inner) = self.storage.upgrade() else {
            return true;
        };
        let inner = inner.borrow();
        match inner.slots.get(self.index) {
            Some(slot) if slot.generation == self.generation => {
                slot.node.as_ref().map_or(true, |node| node.removed)
            }
            _ => true,
        }
    }

    pub fn tag(&self) -> Option<String> {
        let inner = self.storage.upgrade()?;
        let inner = inner.borrow();
        let slot = inner.slots.get(self.index)?;
        if slot.generation != self.generation {
            return None;
        }
        slot.node.as_ref().and_then(|node| node.tag.clone())
    }
}

/// A named set of events, each with its own subscriber list.
pub struct EventEmitter<T> {
    name: String,
    events: HashMap<String, EventEmitterStorage<T>>,
}

impl<T: 'static> EventEmitter<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_event(&self, name: &str) -> Option<EventEmitterStorage<T>> {
        self.events.get(name).cloned()
    }

    /// Returns the storage for `name`, creating it on first use.
    pub fn register_event(&mut self, name: &str) -> EventEmitterStorage<T> {
        self.events
            .entry(name.to_string())
            .or_insert_with(|| EventEmitterStorage::new(name))
            .clone()
    }

    /// Emits `name` if anyone registered it. Returns whether the event exists.
    pub fn emit_event(&self, name: &str, payload: &T) -> bool {
        match self.events.get(name) {
            Some(storage) => {
                storage.emit(payload);
                true
            }
            None => false,
        }
    }

    /// Drops the event and every subscription to it.
    pub fn delete_event(&mut self, name: &str) -> bool {
        match self.events.remove(name) {
            Some(storage) => {
                storage.clear();
                true
            }
            None => false,
        }
    }

    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.events.keys().cloned().collect();
        names.sort();
        names
    }
}
