//! Wrapper handles.
//!
//! A [`Wrapper`] is the per-node lifecycle object returned by
//! [`Coordinator::wrap`](super::Coordinator::wrap). It carries hook lists,
//! owned resources and keyed bindings, and may own child wrappers that are
//! torn down with it.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use slotmap::new_key_type;

use super::coordinator::{self, SharedRef, Transitions};
use super::host::{Host, NodeKey};
use crate::error::Result;
use crate::reactive::{Disposable, Effect};

new_key_type! {
    /// Identifier of a wrapper. Stays unique after the wrapper is disposed.
    pub struct WrapperId;
}

/// Lifecycle state of a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountState {
    /// Created, or detached from the root container. Can (re)mount.
    Unmounted,
    /// Reachable from the root container.
    Mounted,
    /// Torn down. Terminal.
    Disposed,
}

/// Handle to a wrapper bound to one structural node.
///
/// Handles are cheap to clone and compare by wrapper id. Operations that
/// register something on a disposed wrapper fail with
/// [`Error::UseAfterDispose`](crate::Error::UseAfterDispose).
pub struct Wrapper<N: NodeKey> {
    id: WrapperId,
    node: N,
    shared: SharedRef<N>,
}

impl<N: NodeKey> Wrapper<N> {
    pub(super) fn from_parts(id: WrapperId, node: N, shared: SharedRef<N>) -> Self {
        Self { id, node, shared }
    }

    /// Identity of this wrapper, usable as a registry key.
    pub fn id(&self) -> WrapperId {
        self.id
    }

    /// The structural node this wrapper is bound to.
    pub fn node(&self) -> N {
        self.node
    }

    /// Current lifecycle state. `Disposed` once the wrapper is torn down.
    pub fn state(&self) -> MountState {
        coordinator::state_of(&self.shared, self.id)
    }

    /// Whether the node was reachable at the last observation.
    pub fn is_mounted(&self) -> bool {
        self.state() == MountState::Mounted
    }

    /// Whether [`unmount`](Wrapper::unmount) has run.
    pub fn is_disposed(&self) -> bool {
        self.state() == MountState::Disposed
    }

    /// Register a hook that runs on every Unmounted → Mounted transition.
    ///
    /// If the wrapper is already mounted the hook also runs once right away.
    pub fn on_mount<F>(&self, hook: F) -> Result<()>
    where
        F: FnMut() + 'static,
    {
        coordinator::add_on_mount(&self.shared, self.id, Rc::new(RefCell::new(hook)))
    }

    /// Register a hook that runs whenever the wrapper leaves the mounted state,
    /// whether by detach or by disposal.
    pub fn before_unmount<F>(&self, hook: F) -> Result<()>
    where
        F: FnMut() + 'static,
    {
        coordinator::add_before_unmount(&self.shared, self.id, Rc::new(RefCell::new(hook)))
    }

    /// Release `resource` when this wrapper is disposed.
    ///
    /// On a disposed wrapper the resource is released immediately and
    /// `UseAfterDispose` is returned.
    pub fn own<D>(&self, resource: D) -> Result<()>
    where
        D: Disposable + 'static,
    {
        coordinator::own(&self.shared, self.id, Box::new(resource))
    }

    /// Start an effect whose lifetime is bound to this wrapper.
    pub fn effect<F>(&self, run: F) -> Result<Effect>
    where
        F: FnMut() + 'static,
    {
        coordinator::ensure_live(&self.shared, self.id)?;
        let effect = Effect::new(run);
        self.own(effect.clone())?;
        Ok(effect)
    }

    /// Attach `resource` under `key`, releasing whatever was bound there before.
    pub fn bind<D>(&self, key: &'static str, resource: D) -> Result<()>
    where
        D: Disposable + 'static,
    {
        coordinator::bind(&self.shared, self.id, key, Box::new(resource))
    }

    /// Release the resource bound under `key`. Returns whether one was bound.
    pub fn unbind(&self, key: &str) -> Result<bool> {
        coordinator::unbind(&self.shared, self.id, key)
    }

    /// Create a wrapper for `node` owned by this one.
    ///
    /// Owned wrappers are disposed before their owner.
    pub fn child(&self, node: N) -> Result<Wrapper<N>> {
        let id = coordinator::register(&self.shared, node, Some(self.id))?;
        Ok(Wrapper::from_parts(id, node, Rc::clone(&self.shared)))
    }

    /// Live wrappers owned by this one, in creation order.
    pub fn children(&self) -> Vec<Wrapper<N>> {
        coordinator::children_of(&self.shared, self.id)
            .into_iter()
            .filter_map(|id| {
                let node = coordinator::node_of(&self.shared, id)?;
                Some(Wrapper::from_parts(id, node, Rc::clone(&self.shared)))
            })
            .collect()
    }

    /// The owning wrapper, if any.
    pub fn parent(&self) -> Option<Wrapper<N>> {
        let id = coordinator::parent_of(&self.shared, self.id)?;
        let node = coordinator::node_of(&self.shared, id)?;
        Some(Wrapper::from_parts(id, node, Rc::clone(&self.shared)))
    }

    /// Dispose this wrapper and everything it owns.
    ///
    /// Owned wrappers are torn down first, depth-first. Then this wrapper's
    /// `before_unmount` hooks run (only if it was mounted), and its resources
    /// and bindings are released. Calling it again is a no-op.
    ///
    /// Returns the ids disposed by this call, in teardown order.
    pub fn unmount(&self) -> Vec<WrapperId> {
        let mut disposed = Vec::new();
        coordinator::dispose(&self.shared, self.id, &mut disposed);
        disposed
    }

    /// Run an observation tick limited to this wrapper and its owned subtree.
    pub fn observe<H>(&self, host: &H) -> Result<Transitions>
    where
        H: Host<Node = N> + ?Sized,
    {
        coordinator::ensure_live(&self.shared, self.id)?;
        Ok(coordinator::observe_from(&self.shared, host, &[self.id]))
    }
}

impl<N: NodeKey> Clone for Wrapper<N> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: self.node,
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<N: NodeKey> PartialEq for Wrapper<N> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<N: NodeKey> Eq for Wrapper<N> {}

impl<N: NodeKey> fmt::Debug for Wrapper<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("state", &self.state())
            .finish()
    }
}
