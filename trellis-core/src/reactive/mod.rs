//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, derived values,
//! and effects. These primitives form the foundation of Trellis's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a derived value or effect), the signal
//! registers itself as a dependency of that computation. When the signal's
//! value changes, its subscribers are notified synchronously and in order.
//!
//! ## Derived Values
//!
//! A Derived is a read-only signal recomputed from other reactive values. It
//! re-subscribes on every run, so dependencies that a run no longer reads
//! stop triggering it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs once on registration
//! and again whenever a dependency it read changes. Effects are used to
//! synchronize reactive state with the outside world, such as updating
//! presented content.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local stack of dependency collectors.
//! When a signal is read, we check if there is an active collector and, if so,
//! add the signal to it. Everything is single-threaded and synchronous: a
//! write runs its whole notification chain before returning, and there is no
//! batching and no topological scheduling.

mod context;
mod derived;
mod effect;
mod signal;
mod subscriber;

pub use context::{untrack, Dependencies, ReactiveContext, Source};
pub use derived::Derived;
pub use effect::Effect;
pub use signal::{Identity, Signal, SourceId};
pub use subscriber::{Disposable, SubscriberId, Subscription};
