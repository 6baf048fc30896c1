//! Trellis Core
//!
//! This crate provides the runtime core of the Trellis UI toolkit. It
//! implements:
//!
//! - Reactive primitives (signals, derived values, effects) with automatic
//!   dependency tracking and synchronous propagation
//! - A lifecycle coordinator that binds wrappers to nodes of an external
//!   structural tree and runs mount/unmount hooks as nodes are attached and
//!   detached
//!
//! # Architecture
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `lifecycle`: Wrappers, the node registry and attachment observation
//! - `error`: The crate-wide error type
//!
//! Everything is single-threaded: handles are `Rc`-based and not `Send`.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use trellis_core::reactive::{Derived, Effect, Signal};
//!
//! let count = Signal::new(1);
//! let doubled = {
//!     let count = count.clone();
//!     Derived::new(move || count.get() * 2)
//! };
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let _effect = {
//!     let (doubled, seen) = (doubled.clone(), seen.clone());
//!     Effect::new(move || seen.borrow_mut().push(doubled.get()))
//! };
//!
//! count.set(5);
//! assert_eq!(*seen.borrow(), vec![2, 10]);
//! ```

pub mod error;
pub mod lifecycle;
pub mod reactive;

pub use error::{Error, Result};
