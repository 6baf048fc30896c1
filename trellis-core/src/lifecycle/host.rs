//! Host capability required by the lifecycle coordinator.
//!
//! The coordinator never walks or mutates the structural tree itself. The
//! only thing it asks of its environment is whether a node is currently
//! reachable from the root container.

use std::fmt::Debug;
use std::hash::Hash;

/// Requirements on node identities used as registry keys.
pub trait NodeKey: Copy + Eq + Hash + Debug + 'static {}

impl<T: Copy + Eq + Hash + Debug + 'static> NodeKey for T {}

/// The structural tree a [`Coordinator`](super::Coordinator) observes.
///
/// Implementations answer reachability for the nodes wrappers are bound to.
/// The coordinator calls [`contains`](Host::contains) once per tracked
/// wrapper on every observation tick, typically after the host reports a
/// batch of structural mutations.
pub trait Host {
    /// Opaque node identity, also used as the node-registry key.
    type Node: NodeKey;

    /// Is `node` currently reachable from `root` (or equal to it)?
    ///
    /// Must return `false`, not fail, for nodes that no longer exist.
    fn contains(&self, root: Self::Node, node: Self::Node) -> bool;
}

impl<H: Host + ?Sized> Host for &H {
    type Node = H::Node;

    fn contains(&self, root: Self::Node, node: Self::Node) -> bool {
        (**self).contains(root, node)
    }
}
