//! Lifecycle Coordination
//!
//! Binds lifecycle-aware wrappers to nodes of an external structural tree and
//! runs their hooks as those nodes enter and leave the root container.
//!
//! # Concepts
//!
//! - A [`Host`] answers one question: is this node reachable from the root?
//! - A [`Coordinator`] keeps the node registry and the owner tree of
//!   wrappers, and turns reachability changes into mount/detach transitions
//!   on each [`observe`](Coordinator::observe) tick.
//! - A [`Wrapper`] holds `on_mount` and `before_unmount` hooks plus owned
//!   resources (effects, subscriptions, child wrappers). Unmounting it
//!   disposes its whole owned subtree, children first.
//!
//! [`MemoryTree`] is an in-memory host, handy for tests.

mod config;
mod coordinator;
mod host;
mod memory;
mod wrapper;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, Transitions};
pub use host::{Host, NodeKey};
pub use memory::{MemoryTree, NodeId};
pub use wrapper::{MountState, Wrapper, WrapperId};
