//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and an
//! ordered list of subscriber callbacks.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (derived/effect), the
//!    signal adds itself to the context's dependency set, once per run.
//!
//! 2. When a write produces a value that differs from the current one, every
//!    subscriber is invoked, in subscription order, with the new value.
//!
//! 3. Derived values and effects subscribe to the signals they captured, so a
//!    write re-runs them synchronously before `set` returns.
//!
//! # Equality
//!
//! Change detection uses `PartialEq`, i.e. structural equality. For opaque
//! values where only identity matters, store them as [`Identity`], whose
//! equality is `Rc::ptr_eq`. Then a write of a freshly allocated but equal
//! value still notifies, and a write of the same allocation never does.
//!
//! # Re-entrancy
//!
//! Notification iterates over a snapshot of the subscriber list. Before each
//! callback runs, we check that it is still registered. A callback removed by
//! an earlier sibling is therefore skipped, and no callback runs twice.
//! Callbacks added during a notification first run on the next write.
//! A write issued from inside a callback is processed to completion before
//! the remaining siblings of the outer write run; those siblings still see
//! the outer write's value.
//!
//! # Threading
//!
//! Signals are single-threaded (`!Send`). Tracking state is thread-local, and
//! a signal is only ever touched from the thread that created it.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use tracing::trace;

use super::context::{ReactiveContext, Source};
use super::subscriber::{SubscriberId, Subscription};
use crate::error::{Error, Result};

/// Unique identifier of a reactive cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    /// Generate a new unique source ID.
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

type Callback<T> = Rc<dyn Fn(&T)>;

struct SignalInner<T> {
    id: SourceId,
    /// Replaced on write, so readers can hold a snapshot without a borrow.
    value: RefCell<Rc<T>>,
    subscribers: RefCell<IndexMap<SubscriberId, Callback<T>>>,
}

/// A mutable reactive cell holding a value of type `T`.
///
/// Cloning a `Signal` yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: SourceId::next(),
                value: RefCell::new(Rc::new(value)),
                subscribers: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    /// Read the value by reference.
    ///
    /// If called within a reactive context, this registers the signal as a
    /// dependency of the running computation.
    ///
    /// `f` sees the value current at the time of the call, even if it writes
    /// to this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        self.with_untracked(f)
    }

    /// Read the value by reference without registering a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = Rc::clone(&self.inner.value.borrow());
        f(&value)
    }

    /// Register a callback invoked with the new value after every change.
    ///
    /// Callbacks run in subscription order. The returned handle removes
    /// exactly this callback.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = SubscriberId::new();
        self.inner
            .subscribers
            .borrow_mut()
            .insert(id, Rc::new(callback));

        let weak: Weak<SignalInner<T>> = Rc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.borrow_mut().shift_remove(&id);
            }
        })
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    fn track(&self) {
        ReactiveContext::track(self.inner.id, || Rc::new(self.clone()) as Rc<dyn Source>);
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the signal
    /// as a dependency of the running computation.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }

    /// Invoke every subscriber that is still registered with the current value.
    pub(crate) fn notify(&self) {
        let value = Rc::clone(&self.inner.value.borrow());
        let snapshot: Vec<(SubscriberId, Callback<T>)> = self
            .inner
            .subscribers
            .borrow()
            .iter()
            .map(|(id, callback)| (*id, Rc::clone(callback)))
            .collect();

        trace!(source = self.inner.id.0, subscribers = snapshot.len(), "notifying");

        for (id, callback) in snapshot {
            if !self.inner.subscribers.borrow().contains_key(&id) {
                continue;
            }
            callback(&*value);
        }
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Set a new value and notify subscribers if it differs from the current one.
    ///
    /// A panic raised by a subscriber propagates to the caller.
    pub fn set(&self, value: T) {
        if self.store(value) {
            self.notify();
        }
    }

    /// Like [`set`](Signal::set), but a panicking subscriber is reported as
    /// [`Error::Callback`] instead of unwinding into the caller.
    ///
    /// Returns whether the value changed.
    pub fn try_set(&self, value: T) -> Result<bool> {
        if !self.store(value) {
            return Ok(false);
        }
        panic::catch_unwind(AssertUnwindSafe(|| self.notify())).map_err(Error::from_panic)?;
        Ok(true)
    }

    /// Update the value using a function of the current value.
    ///
    /// `f` may itself write to this signal; its result is written afterwards.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.with_untracked(f);
        self.set(next);
    }

    /// Store `value` without notifying. Returns whether it changed.
    pub(crate) fn store(&self, value: T) -> bool {
        let mut current = self.inner.value.borrow_mut();
        if **current == value {
            return false;
        }
        *current = Rc::new(value);
        true
    }
}

impl<T: 'static> Source for Signal<T> {
    fn source_id(&self) -> SourceId {
        self.inner.id
    }

    fn subscribe_change(&self, notify: Rc<dyn Fn()>) -> Subscription {
        self.subscribe(move |_| notify())
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug> Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &**self.inner.value.borrow())
            .field("subscriber_count", &self.inner.subscribers.borrow().len())
            .finish()
    }
}

/// Shared value compared by pointer identity rather than by content.
///
/// Storing opaque objects in a signal as `Identity<T>` makes change detection
/// use reference equality.
pub struct Identity<T: ?Sized>(pub Rc<T>);

impl<T> Identity<T> {
    /// Allocate a new identity.
    pub fn new(value: T) -> Self {
        Self(Rc::new(value))
    }
}

impl<T: ?Sized> Clone for Identity<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for Identity<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for Identity<T> {}

impl<T: ?Sized> Deref for Identity<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + Debug> Debug for Identity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identity").field(&&*self.0).finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn signal_get_and_set() {
        let signal = Signal::new(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let signal = Signal::new(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);
    }

    #[test]
    fn subscribers_receive_new_value() {
        let signal = Signal::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = signal.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        signal.set(1);
        signal.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn equal_write_does_not_notify() {
        let signal = Signal::new(String::from("same"));
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let _sub = signal.subscribe(move |_| calls_clone.set(calls_clone.get() + 1));

        signal.set(String::from("same"));
        assert_eq!(calls.get(), 0);

        signal.set(String::from("different"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn subscribers_run_in_subscription_order() {
        let signal = Signal::new(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let subs: Vec<_> = (0..4)
            .map(|n| {
                let order = order.clone();
                signal.subscribe(move |_| order.borrow_mut().push(n))
            })
            .collect();

        signal.set(1);
        assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);

        subs[1].unsubscribe();
        order.borrow_mut().clear();
        signal.set(2);
        assert_eq!(*order.borrow(), vec![0, 2, 3]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let signal = Signal::new(0);
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();

        let sub = signal.subscribe(move |_| calls_clone.set(calls_clone.get() + 1));
        let _other = signal.subscribe(|_| {});
        assert_eq!(signal.subscriber_count(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(signal.subscriber_count(), 1);

        signal.set(1);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn reentrant_unsubscribe_skips_removed_sibling() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let second_slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let first = {
            let log = log.clone();
            let second_slot = second_slot.clone();
            signal.subscribe(move |_| {
                log.borrow_mut().push("first");
                if let Some(second) = second_slot.borrow().as_ref() {
                    second.unsubscribe();
                }
            })
        };
        let second = {
            let log = log.clone();
            signal.subscribe(move |_| log.borrow_mut().push("second"))
        };
        let third = {
            let log = log.clone();
            signal.subscribe(move |_| log.borrow_mut().push("third"))
        };
        *second_slot.borrow_mut() = Some(second);

        signal.set(1);
        assert_eq!(*log.borrow(), vec!["first", "third"]);

        log.borrow_mut().clear();
        signal.set(2);
        assert_eq!(*log.borrow(), vec!["first", "third"]);

        first.unsubscribe();
        third.unsubscribe();
    }

    #[test]
    fn self_unsubscribe_during_notification() {
        let signal = Signal::new(0);
        let calls = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let sub = {
            let calls = calls.clone();
            let slot = slot.clone();
            signal.subscribe(move |_| {
                calls.set(calls.get() + 1);
                if let Some(me) = slot.borrow().as_ref() {
                    me.unsubscribe();
                }
            })
        };
        let after = Rc::new(Cell::new(0));
        let _after_sub = {
            let after = after.clone();
            signal.subscribe(move |_| after.set(after.get() + 1))
        };
        *slot.borrow_mut() = Some(sub);

        signal.set(1);
        signal.set(2);
        assert_eq!(calls.get(), 1);
        assert_eq!(after.get(), 2);
    }

    #[test]
    fn subscribe_during_notification_waits_for_next_write() {
        let signal = Signal::new(0);
        let late_calls = Rc::new(Cell::new(0));
        let late: Rc<RefCell<Vec<Subscription>>> = Rc::new(RefCell::new(Vec::new()));

        let _adder = {
            let signal = signal.clone();
            let late_calls = late_calls.clone();
            let late = late.clone();
            signal.clone().subscribe(move |_| {
                if late.borrow().is_empty() {
                    let late_calls = late_calls.clone();
                    let sub = signal.subscribe(move |_| late_calls.set(late_calls.get() + 1));
                    late.borrow_mut().push(sub);
                }
            })
        };

        signal.set(1);
        assert_eq!(late_calls.get(), 0);
        signal.set(2);
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn nested_write_runs_ahead_of_pending_siblings() {
        let signal = Signal::new(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let _bumper = {
            let signal = signal.clone();
            let log = log.clone();
            signal.clone().subscribe(move |v| {
                log.borrow_mut().push(format!("bumper saw {v}"));
                if *v == 1 {
                    signal.set(2);
                }
            })
        };
        let _observer = {
            let log = log.clone();
            signal.subscribe(move |v| log.borrow_mut().push(format!("observer saw {v}")))
        };

        signal.set(1);
        assert_eq!(
            *log.borrow(),
            vec![
                "bumper saw 1",
                "bumper saw 2",
                "observer saw 2",
                "observer saw 1",
            ]
        );
        assert_eq!(signal.get(), 2);
    }

    #[test]
    fn try_set_reports_panicking_subscriber() {
        let signal = Signal::new(0);
        let _sub = signal.subscribe(|v| {
            if *v == 3 {
                panic!("cannot handle three");
            }
        });

        assert_eq!(signal.try_set(1), Ok(true));
        assert_eq!(signal.try_set(1), Ok(false));
        assert_eq!(
            signal.try_set(3),
            Err(Error::Callback { message: "cannot handle three".into() })
        );
        assert_eq!(signal.get(), 3);
    }

    #[test]
    fn identity_compares_by_pointer() {
        let first = Identity::new(vec![1, 2, 3]);
        let signal = Signal::new(first.clone());
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let _sub = signal.subscribe(move |_| calls_clone.set(calls_clone.get() + 1));

        signal.set(first.clone());
        assert_eq!(calls.get(), 0);

        signal.set(Identity::new(vec![1, 2, 3]));
        assert_eq!(calls.get(), 1);
        assert_eq!(signal.get().len(), 3);
    }

    #[test]
    fn subscription_does_not_keep_signal_alive() {
        let signal = Signal::new(0);
        let weak = Rc::downgrade(&signal.inner);
        let sub = signal.subscribe(|_| {});

        drop(signal);
        assert!(weak.upgrade().is_none());
        sub.unsubscribe();
    }

    #[test]
    fn write_back_during_with_is_processed() {
        let a = Signal::new(1);
        let b = Signal::new(0);
        let _echo = {
            let (a, b) = (a.clone(), b.clone());
            crate::reactive::Effect::new(move || {
                let v = b.get();
                if v > 0 {
                    a.set(v * 10);
                }
            })
        };

        let seen = a.with(|v| {
            b.set(*v + 1);
            *v
        });

        assert_eq!(seen, 1);
        assert_eq!(b.get(), 2);
        assert_eq!(a.get(), 20);
    }

    #[test]
    fn update_result_lands_after_write_back() {
        let a = Signal::new(1);
        let b = Signal::new(0);
        let echoed = Rc::new(Cell::new(0));
        let _echo = {
            let (a, b, echoed) = (a.clone(), b.clone(), echoed.clone());
            crate::reactive::Effect::new(move || {
                let v = b.get();
                if v > 0 {
                    echoed.set(v);
                    a.set(100);
                }
            })
        };

        a.update(|v| {
            b.set(*v + 1);
            *v + 5
        });

        assert_eq!(echoed.get(), 2);
        assert_eq!(a.get(), 6);
    }

    #[test]
    fn signal_ids_are_unique() {
        let s1 = Signal::new(0);
        let s2 = Signal::new(0);
        let s3 = Signal::new(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }
}
