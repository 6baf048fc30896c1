//! Derived Implementation
//!
//! A Derived is a read-only signal whose value is produced by a compute
//! function over other reactive values.
//!
//! # How Derived Values Work
//!
//! 1. On construction, the compute function runs once inside a fresh
//!    tracking frame. The sources it reads become its dependencies, and the
//!    result becomes its value.
//!
//! 2. When any dependency notifies, the derived value releases *all* of its
//!    subscriptions, reruns compute under a fresh frame, stores the result
//!    and subscribes to whatever that run read. Dependencies may differ from
//!    run to run; a branch that stops reading a source also stops listening
//!    to it.
//!
//! 3. The result goes through the backing signal's write path, so the
//!    derived value's own subscribers are notified only when it actually
//!    changed.
//!
//! Reading a derived value inside another computation registers the derived
//! value itself as the dependency, not its upstream sources, so derived
//! values compose into a graph instead of being flattened.
//!
//! # Generations
//!
//! Every run bumps a generation counter, and each subscription remembers the
//! generation it was created for. A notification that arrives for an older
//! generation is ignored. Such a notification can come from a source that is
//! partway through notifying while we re-subscribe.
//!
//! # Known Limitation
//!
//! There is no topological scheduling. If two paths lead back to the same
//! root signal (a diamond), one root write can make a derived value
//! recompute more than once before it settles. This is accepted, and callers
//! may depend on the exact re-run count.
//!
//! # Contract
//!
//! The compute function should be free of externally observable side
//! effects. This is not enforced.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use super::context::{Dependencies, ReactiveContext};
use super::signal::{Signal, SourceId};
use super::subscriber::{Disposable, SubscriberId, Subscription};
use crate::error::{Error, Result};

struct DerivedInner<T> {
    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The computation function.
    compute: Box<dyn Fn() -> T>,

    /// Backing cell; its identity is what dependents track.
    cell: Signal<T>,

    /// Subscriptions on the sources captured by the latest run.
    dependencies: RefCell<SmallVec<[Subscription; 4]>>,

    generation: Cell<u64>,
    recompute_count: Cell<usize>,
    disposed: Cell<bool>,
}

/// A read-only reactive value recomputed from other reactive values.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Derived, Signal};
///
/// let count = Signal::new(1);
/// let doubled = {
///     let count = count.clone();
///     Derived::new(move || count.get() * 2)
/// };
/// assert_eq!(doubled.get(), 2);
///
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a derived value, running `compute` once immediately.
    ///
    /// A panic in the initial run propagates to the caller.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let subscriber_id = SubscriberId::new();

        let ctx = ReactiveContext::enter(subscriber_id);
        let value = compute();
        let deps = ctx.finish();

        let inner = Rc::new(DerivedInner {
            subscriber_id,
            compute: Box::new(compute),
            cell: Signal::new(value),
            dependencies: RefCell::new(SmallVec::new()),
            generation: Cell::new(0),
            recompute_count: Cell::new(0),
            disposed: Cell::new(false),
        });
        inner.attach(deps);

        Self { inner }
    }

    /// Get the current value, registering this derived value as a dependency
    /// of the running computation.
    pub fn get(&self) -> T {
        self.inner.cell.get()
    }

    /// Read the current value by reference, tracked.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.cell.with(f)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.cell.get_untracked()
    }

    /// Derived values cannot be written.
    ///
    /// Always fails with [`Error::InvalidMutation`].
    pub fn set(&self, _value: T) -> Result<()> {
        Err(Error::InvalidMutation {
            cell: self.inner.cell.id(),
        })
    }

    /// Register a callback invoked with the new value after every change.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        self.inner.cell.subscribe(callback)
    }

    /// Release all upstream subscriptions. The value stays frozen at its last
    /// computed state. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.release();
    }

    /// Whether [`dispose`](Derived::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Identity of the backing cell.
    pub fn id(&self) -> SourceId {
        self.inner.cell.id()
    }

    /// The subscriber ID used while computing.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Number of sources captured by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }

    /// Number of recomputations since construction (the initial run is not counted).
    pub fn recompute_count(&self) -> usize {
        self.inner.recompute_count.get()
    }

    /// Get the number of subscribers on this derived value.
    pub fn subscriber_count(&self) -> usize {
        self.inner.cell.subscriber_count()
    }
}

impl<T> DerivedInner<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Drop every current subscription and invalidate their generation.
    fn release(&self) {
        self.generation.set(self.generation.get() + 1);
        let old = std::mem::take(&mut *self.dependencies.borrow_mut());
        for subscription in old {
            subscription.unsubscribe();
        }
    }

    /// Subscribe to the sources captured by the latest run.
    fn attach(self: &Rc<Self>, deps: Dependencies) {
        let generation = self.generation.get();
        let subscriptions: SmallVec<[Subscription; 4]> = deps
            .into_iter()
            .map(|source| {
                let this = Rc::clone(self);
                source.subscribe_change(Rc::new(move || {
                    if this.generation.get() == generation && !this.disposed.get() {
                        this.recompute();
                    }
                }))
            })
            .collect();
        *self.dependencies.borrow_mut() = subscriptions;
    }

    /// Release, recompute under a fresh frame, store, re-subscribe, notify.
    ///
    /// If compute panics, the old subscriptions are already gone and no new
    /// ones exist; the panic then propagates to whoever wrote upstream.
    fn recompute(self: &Rc<Self>) {
        self.release();

        let ctx = ReactiveContext::enter(self.subscriber_id);
        let value = (self.compute)();
        let deps = ctx.finish();

        self.recompute_count.set(self.recompute_count.get() + 1);
        trace!(
            subscriber = self.subscriber_id.raw(),
            dependencies = deps.len(),
            "derived recomputed"
        );

        if self.disposed.get() {
            return;
        }

        let changed = self.cell.store(value);
        self.attach(deps);
        if changed {
            self.cell.notify();
        }
    }
}

impl<T> Disposable for Derived<T>
where
    T: Clone + PartialEq + 'static,
{
    fn dispose(&self) {
        Derived::dispose(self);
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Derived<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("cell", &self.inner.cell)
            .field("dependency_count", &self.inner.dependencies.borrow().len())
            .field("recompute_count", &self.inner.recompute_count.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn upstream_write_inside_with_recomputes() {
        let base = Signal::new(2);
        let doubled = {
            let base = base.clone();
            Derived::new(move || base.get() * 2)
        };

        let seen = doubled.with(|v| {
            base.set(5);
            *v
        });

        assert_eq!(seen, 4);
        assert_eq!(doubled.get(), 10);
    }

    #[test]
    fn derived_computes_on_creation() {
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let derived = Derived::new(move || {
            calls_clone.set(calls_clone.get() + 1);
            42
        });

        assert_eq!(calls.get(), 1);
        assert_eq!(derived.get(), 42);
        assert_eq!(derived.get(), 42);
        assert_eq!(calls.get(), 1);
        assert_eq!(derived.recompute_count(), 0);
    }

    #[test]
    fn derived_follows_its_source() {
        let s = Signal::new(1);
        let d = {
            let s = s.clone();
            Derived::new(move || s.get() * 2)
        };
        assert_eq!(d.get(), 2);

        s.set(5);
        assert_eq!(d.get(), 10);
        assert_eq!(d.recompute_count(), 1);
    }

    #[test]
    fn writing_a_derived_value_fails() {
        let d = Derived::new(|| 1);
        assert_eq!(d.set(2), Err(Error::InvalidMutation { cell: d.id() }));
        assert_eq!(d.get(), 1);
    }

    #[test]
    fn dynamic_dependencies_are_pruned() {
        let use_a = Signal::new(true);
        let a = Signal::new(1);
        let b = Signal::new(100);

        let d = {
            let (use_a, a, b) = (use_a.clone(), a.clone(), b.clone());
            Derived::new(move || if use_a.get() { a.get() } else { b.get() })
        };
        assert_eq!(d.dependency_count(), 2);
        assert_eq!(b.subscriber_count(), 0);

        use_a.set(false);
        assert_eq!(d.get(), 100);
        assert_eq!(a.subscriber_count(), 0);
        assert_eq!(b.subscriber_count(), 1);

        let runs = d.recompute_count();
        a.set(2);
        assert_eq!(d.recompute_count(), runs);

        b.set(200);
        assert_eq!(d.get(), 200);
        assert_eq!(d.recompute_count(), runs + 1);
    }

    #[test]
    fn unchanged_result_does_not_notify_downstream() {
        let s = Signal::new(3);
        let parity = {
            let s = s.clone();
            Derived::new(move || s.get() % 2)
        };
        let notified = Rc::new(Cell::new(0));
        let notified_clone = notified.clone();
        let _sub = parity.subscribe(move |_| notified_clone.set(notified_clone.get() + 1));

        s.set(5);
        assert_eq!(parity.recompute_count(), 1);
        assert_eq!(notified.get(), 0);

        s.set(6);
        assert_eq!(notified.get(), 1);
    }

    #[test]
    fn derived_of_derived_tracks_the_derived() {
        let base = Signal::new(5);
        let doubled = {
            let base = base.clone();
            Derived::new(move || base.get() * 2)
        };
        let plus_ten = {
            let doubled = doubled.clone();
            Derived::new(move || doubled.get() + 10)
        };

        assert_eq!(plus_ten.get(), 20);
        assert_eq!(plus_ten.dependency_count(), 1);
        assert_eq!(base.subscriber_count(), 1);

        base.set(10);
        assert_eq!(doubled.get(), 20);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn panicking_recompute_leaves_no_subscriptions() {
        let s = Signal::new(1);
        let d = {
            let s = s.clone();
            Derived::new(move || {
                let v = s.get();
                assert!(v < 10, "value too large");
                v
            })
        };
        assert_eq!(s.subscriber_count(), 1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| s.set(50)));
        assert!(result.is_err());
        assert_eq!(s.subscriber_count(), 0);
        assert_eq!(d.dependency_count(), 0);
        assert!(!ReactiveContext::is_active());
        assert_eq!(d.get(), 1);
    }

    #[test]
    fn dispose_freezes_the_value() {
        let s = Signal::new(1);
        let d = {
            let s = s.clone();
            Derived::new(move || s.get() + 1)
        };

        d.dispose();
        d.dispose();
        assert!(d.is_disposed());
        assert_eq!(s.subscriber_count(), 0);

        s.set(7);
        assert_eq!(d.get(), 2);
    }
}
