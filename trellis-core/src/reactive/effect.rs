//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a source
//! it read during its latest run changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately under a fresh
//!    tracking frame to establish its initial dependencies.
//!
//! 2. When any dependency changes, the effect releases all of its current
//!    subscriptions, runs again, and subscribes to what that run read.
//!
//! 3. There is no "skip if unchanged" step: an effect has no output value,
//!    so every notification from a captured dependency re-runs it fully.
//!
//! # Differences from Derived
//!
//! - Derived values produce a value; effects do not.
//! - Derived values notify their own subscribers; effects are leaves.
//!
//! # Stopping
//!
//! [`Effect::stop`] releases every subscription, drops the closure (and with
//! it anything it captured) and makes the effect inert. It is idempotent and
//! may be called from inside the effect's own body; the run in progress
//! finishes, but no new subscriptions are established.
//!
//! # Panics
//!
//! A panic inside the effect function propagates to the caller of
//! [`Effect::new`] or to whoever wrote the dependency. Old subscriptions are
//! always released before a re-run, so a panicking run never leaves stale
//! subscriptions behind. [`Effect::try_new`] converts a panic in the initial
//! run into [`Error::Callback`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::trace;

use super::context::{Dependencies, ReactiveContext};
use super::subscriber::{Disposable, SubscriberId, Subscription};
use crate::error::{Error, Result};

type EffectFn = Box<dyn FnMut()>;

struct EffectInner {
    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The effect function. Taken out while it runs, dropped on stop.
    run: RefCell<Option<EffectFn>>,

    /// Subscriptions on the sources captured by the latest run.
    dependencies: RefCell<SmallVec<[Subscription; 4]>>,

    generation: Cell<u64>,
    stopped: Cell<bool>,
    run_count: Cell<usize>,
}

/// A side-effecting computation that runs when dependencies change.
///
/// Cloning an `Effect` yields another handle to the same computation; the
/// handle doubles as its stop handle. Dropping every handle does **not** stop
/// the effect, only [`stop`](Effect::stop) does.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use trellis_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// let effect = {
///     let (count, log) = (count.clone(), log.clone());
///     Effect::new(move || log.borrow_mut().push(count.get()))
/// };
///
/// count.set(5);
/// effect.stop();
/// count.set(6);
/// assert_eq!(*log.borrow(), vec![0, 5]);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Rc<EffectInner>,
}

impl Effect {
    /// Register an effect and run it once immediately.
    pub fn new<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        let effect = Self::unstarted(run);
        effect.inner.execute();
        effect
    }

    /// Like [`new`](Effect::new), but a panic in the initial run is returned
    /// as [`Error::Callback`]. The effect is stopped in that case.
    pub fn try_new<F>(run: F) -> Result<Self>
    where
        F: FnMut() + 'static,
    {
        let effect = Self::unstarted(run);
        match panic::catch_unwind(AssertUnwindSafe(|| effect.inner.execute())) {
            Ok(()) => Ok(effect),
            Err(payload) => {
                effect.stop();
                Err(Error::from_panic(payload))
            }
        }
    }

    fn unstarted<F>(run: F) -> Self
    where
        F: FnMut() + 'static,
    {
        Self {
            inner: Rc::new(EffectInner {
                subscriber_id: SubscriberId::new(),
                run: RefCell::new(Some(Box::new(run))),
                dependencies: RefCell::new(SmallVec::new()),
                generation: Cell::new(0),
                stopped: Cell::new(false),
                run_count: Cell::new(0),
            }),
        }
    }

    /// Release all subscriptions and prevent further runs. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.replace(true) {
            return;
        }
        self.inner.release();
        // Drop the closure now unless it is running; the run guard drops it then.
        let run = self.inner.run.borrow_mut().take();
        drop(run);
        trace!(subscriber = self.inner.subscriber_id.raw(), "effect stopped");
    }

    /// Check if the effect has been stopped.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of dependencies captured by the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.borrow().len()
    }
}

impl EffectInner {
    fn release(&self) {
        self.generation.set(self.generation.get() + 1);
        let old = std::mem::take(&mut *self.dependencies.borrow_mut());
        for subscription in old {
            subscription.unsubscribe();
        }
    }

    /// Run the effect function within a fresh tracking frame.
    fn execute(self: &Rc<Self>) {
        if self.stopped.get() {
            return;
        }

        self.release();

        let Some(run) = self.run.borrow_mut().take() else {
            trace!(subscriber = self.subscriber_id.raw(), "effect already running, skipping");
            return;
        };
        let mut guard = RunGuard {
            effect: &**self,
            run: Some(run),
        };

        let ctx = ReactiveContext::enter(self.subscriber_id);
        if let Some(run) = guard.run.as_mut() {
            run();
        }
        let deps = ctx.finish();
        drop(guard);

        self.run_count.set(self.run_count.get() + 1);
        trace!(
            subscriber = self.subscriber_id.raw(),
            dependencies = deps.len(),
            "effect ran"
        );

        if !self.stopped.get() {
            self.attach(deps);
        }
    }

    fn attach(self: &Rc<Self>, deps: Dependencies) {
        let generation = self.generation.get();
        let subscriptions: SmallVec<[Subscription; 4]> = deps
            .into_iter()
            .map(|source| {
                let this = Rc::clone(self);
                source.subscribe_change(Rc::new(move || {
                    if this.generation.get() == generation {
                        this.execute();
                    }
                }))
            })
            .collect();
        *self.dependencies.borrow_mut() = subscriptions;
    }
}

/// Puts the effect function back after a run, even if the run unwinds.
/// A stopped effect keeps its slot empty so the closure is dropped.
struct RunGuard<'a> {
    effect: &'a EffectInner,
    run: Option<EffectFn>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.effect.stopped.get() {
            return;
        }
        if let Some(run) = self.run.take() {
            *self.effect.run.borrow_mut() = Some(run);
        }
    }
}

impl Disposable for Effect {
    fn dispose(&self) {
        self.stop();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("subscriber_id", &self.inner.subscriber_id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
