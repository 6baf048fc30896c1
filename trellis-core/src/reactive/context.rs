//! Reactive Context
//!
//! The reactive context records which sources a computation reads. This is
//! what makes dependency tracking automatic: when a signal is read, it adds
//! itself to the collector on top of the stack, and the derived value or
//! effect that pushed the collector subscribes to everything it gathered once
//! its run finishes.
//!
//! # Implementation
//!
//! We use a thread-local stack of collectors. Entering a context pushes a
//! collector and returns a guard; [`ReactiveContext::finish`] pops it and
//! hands back the captured sources. If the computation panics, the guard's
//! `Drop` pops the frame instead, so the stack never goes out of balance.
//!
//! Only the top frame collects. Nested derived values and effects each push
//! their own frame, and reading a derived value registers the derived value
//! itself in the enclosing frame, never its upstream sources.
//!
//! [`untrack`] pushes a frame that collects nothing, which suspends tracking
//! for the duration of a closure.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::signal::SourceId;
use super::subscriber::{SubscriberId, Subscription};

/// A reactive value that can be captured as a dependency.
///
/// Implemented by [`Signal`](super::Signal) (and therefore by every derived
/// value, which is backed by one). The context stores sources type-erased so
/// that a single computation can depend on cells of different value types.
pub trait Source {
    /// Identity of the source inside a dependency set.
    fn source_id(&self) -> SourceId;

    /// Register `notify` to run whenever the source's value changes.
    fn subscribe_change(&self, notify: Rc<dyn Fn()>) -> Subscription;
}

/// Sources captured during one run, in first-read order.
pub type Dependencies = Vec<Rc<dyn Source>>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The computation collecting into this frame. `None` for untracked frames.
    subscriber_id: Option<SubscriberId>,
    /// Sources read so far, deduplicated by id.
    dependencies: IndexMap<SourceId, Rc<dyn Source>>,
}

/// Guard for one frame of the reactive context stack.
///
/// The frame is popped by [`finish`](ReactiveContext::finish), or by `Drop`
/// if the guarded computation unwinds.
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
    depth: usize,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new collecting context for the given subscriber.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter a frame that suspends tracking.
    fn untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(ContextEntry {
                subscriber_id,
                dependencies: IndexMap::new(),
            });
            stack.len()
        });

        Self {
            subscriber_id,
            depth,
            finished: false,
        }
    }

    /// Check if reads are currently being collected.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the subscriber collecting reads right now, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Record a read of `id` in the active frame.
    ///
    /// `source` is only invoked the first time `id` is seen in this frame,
    /// so repeated reads of the same cell register it exactly once.
    pub fn track(id: SourceId, source: impl FnOnce() -> Rc<dyn Source>) {
        let needed = CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.subscriber_id.is_some() && !entry.dependencies.contains_key(&id))
                .unwrap_or(false)
        });
        if !needed {
            return;
        }

        let source = source();
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                entry.dependencies.entry(id).or_insert(source);
            }
        });
    }

    /// Ids captured so far by the active frame, in first-read order.
    pub fn tracked_ids() -> Vec<SourceId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    /// Pop this frame and return the sources it captured.
    pub fn finish(mut self) -> Dependencies {
        self.finished = true;
        self.pop()
            .map(|entry| entry.dependencies.into_values().collect())
            .unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext popped out of order"
            );
            let popped = stack.pop();
            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
            popped
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` without registering any reads as dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _frame = ReactiveContext::untracked();
    f()
}
