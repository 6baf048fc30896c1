//! Error Types
//!
//! Trellis distinguishes programmer-contract violations, which fail fast,
//! from failures inside user-supplied closures.
//!
//! - [`Error::InvalidMutation`]: something tried to write a [`Derived`].
//! - [`Error::UseAfterDispose`]: an operation targeted a disposed wrapper.
//! - [`Error::Callback`]: a compute, effect, subscriber or hook closure
//!   panicked and the panic was caught at an isolation boundary.
//!
//! User closures report failure by panicking. On the default paths the panic
//! unwinds to whoever triggered the run, the same way an exception would.
//! Only the `try_*` entry points and lifecycle hook dispatch turn a panic
//! into an [`Error::Callback`] value.
//!
//! [`Derived`]: crate::reactive::Derived

use std::any::Any;

use crate::lifecycle::WrapperId;
use crate::reactive::SourceId;

/// Errors produced by the reactive core and the lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A write was attempted on a derived (read-only) value.
    #[error("cannot write to derived value {cell:?}: derived values are read-only")]
    InvalidMutation {
        /// The cell backing the derived value.
        cell: SourceId,
    },

    /// An operation targeted a wrapper that has already been disposed.
    #[error("wrapper {wrapper:?} has been disposed")]
    UseAfterDispose {
        /// The disposed wrapper.
        wrapper: WrapperId,
    },

    /// A user-supplied closure panicked.
    #[error("callback panicked: {message}")]
    Callback {
        /// The panic message, if it was a string.
        message: String,
    },
}

impl Error {
    /// Build a [`Error::Callback`] from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Error::Callback { message }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
