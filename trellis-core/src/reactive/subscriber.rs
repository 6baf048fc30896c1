//! Subscriber types for the reactive system.
//!
//! A subscriber is anything registered on a reactive source: a derived
//! value, an effect, or a plain callback handed to `subscribe`. Every
//! registration yields a [`Subscription`], the release handle that removes
//! exactly that registration again.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
///
/// Each registration on a source, and each derived value or effect, gets a
/// unique ID. Sources key their subscriber lists by it so that releasing a
/// handle removes that exact callback and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Release handle for one registration on a reactive source.
///
/// Dropping the handle does **not** release the registration; owners must
/// call [`unsubscribe`](Subscription::unsubscribe) (directly, or through
/// [`Disposable::dispose`]). The handle only holds a weak reference to the
/// source, so keeping it around never keeps the source alive.
#[must_use = "dropping a Subscription keeps the callback registered; call unsubscribe() to release it"]
pub struct Subscription {
    id: SubscriberId,
    release: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, release: impl FnOnce() + 'static) -> Self {
        Self {
            id,
            release: RefCell::new(Some(Box::new(release))),
        }
    }

    /// The subscriber ID this handle releases.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the registration from its source.
    ///
    /// Idempotent: only the first call has an effect.
    pub fn unsubscribe(&self) {
        let release = self.release.borrow_mut().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Whether the registration has not been released yet.
    pub fn is_active(&self) -> bool {
        self.release.borrow().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A reactive resource that can be released by its owner.
///
/// Lifecycle wrappers own `Disposable`s and release them when they are
/// disposed. Implementations must be idempotent.
pub trait Disposable {
    /// Release the resource. Calling this more than once is a no-op.
    fn dispose(&self);
}

impl Disposable for Subscription {
    fn dispose(&self) {
        self.unsubscribe();
    }
}

impl<D: Disposable + ?Sized> Disposable for Box<D> {
    fn dispose(&self) {
        (**self).dispose();
    }
}
