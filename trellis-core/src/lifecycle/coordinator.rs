//! Lifecycle Coordinator
//!
//! The coordinator owns every wrapper's lifecycle state, the node registry
//! and the owner tree, and it drives mount/detach/dispose transitions.
//!
//! # State Machine
//!
//! ```text
//!   Unmounted ──attach──▶ Mounted ──detach──▶ Unmounted ──…
//!       │                    │
//!       └──── unmount() ─────┴──────────────▶ Disposed (terminal)
//! ```
//!
//! Attach and detach are edge-triggered. They are detected by
//! [`Coordinator::observe`], which asks the [`Host`] whether each tracked
//! node is reachable from the root container. A moved node that stays
//! reachable within a tick produces no transition. A node that leaves and
//! comes back gets a fresh mount cycle.
//!
//! # Ordering
//!
//! Within one tick every reachability answer is collected before any hook
//! runs. Detaches then fire children before parents, and mounts fire parents
//! before children.
//!
//! Disposal cascades down the owner tree depth-first. Every child finishes
//! its whole teardown (hooks, resources, registry entry) before its parent
//! runs its own `before_unmount` hooks and releases its resources.
//!
//! # Hook Isolation
//!
//! Each hook runs under `catch_unwind`. A panicking hook is logged and
//! recorded; the remaining hooks and the cascade still complete. Recorded
//! failures are drained with [`Coordinator::take_hook_errors`].

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::IndexMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::{debug, error, warn};

use super::config::CoordinatorConfig;
use super::host::{Host, NodeKey};
use super::wrapper::{MountState, Wrapper, WrapperId};
use crate::error::{Error, Result};
use crate::reactive::Disposable;

pub(super) type Hook = Rc<RefCell<dyn FnMut()>>;
pub(super) type SharedRef<N> = Rc<RefCell<Shared<N>>>;

/// Lifecycle state of one wrapper.
pub(super) struct WrapperState<N> {
    node: N,
    parent: Option<WrapperId>,
    children: Vec<WrapperId>,
    state: MountState,
    disposing: bool,
    ever_mounted: bool,
    detached_ticks: u32,
    on_mount: Vec<Hook>,
    before_unmount: Vec<Hook>,
    owned: Vec<Box<dyn Disposable>>,
    bindings: IndexMap<&'static str, Box<dyn Disposable>>,
}

impl<N> WrapperState<N> {
    fn new(node: N, parent: Option<WrapperId>) -> Self {
        Self {
            node,
            parent,
            children: Vec::new(),
            state: MountState::Unmounted,
            disposing: false,
            ever_mounted: false,
            detached_ticks: 0,
            on_mount: Vec::new(),
            before_unmount: Vec::new(),
            owned: Vec::new(),
            bindings: IndexMap::new(),
        }
    }
}

/// State shared between a coordinator and all of its wrapper handles.
pub(super) struct Shared<N> {
    root: N,
    config: CoordinatorConfig,
    wrappers: SlotMap<WrapperId, WrapperState<N>>,
    /// Node registry: structural node to the wrappers bound to it.
    registry: IndexMap<N, SmallVec<[WrapperId; 2]>>,
    /// Wrappers without an owner, in creation order.
    top_level: Vec<WrapperId>,
    hook_errors: Vec<Error>,
    ticks: u64,
}

impl<N: NodeKey> Shared<N> {
    fn live_mut(&mut self, id: WrapperId) -> Result<&mut WrapperState<N>> {
        match self.wrappers.get_mut(id) {
            Some(w) if !w.disposing => Ok(w),
            _ => Err(Error::UseAfterDispose { wrapper: id }),
        }
    }

    /// Live wrappers reachable from `starts` in the owner tree, pre-order.
    fn preorder(&self, starts: &[WrapperId]) -> Vec<WrapperId> {
        let mut order = Vec::new();
        let mut stack: Vec<WrapperId> = starts.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            let Some(w) = self.wrappers.get(id) else {
                continue;
            };
            if w.disposing {
                continue;
            }
            order.push(id);
            stack.extend(w.children.iter().rev().copied());
        }
        order
    }

    fn insert(&mut self, node: N, parent: Option<WrapperId>) -> WrapperId {
        let id = self.wrappers.insert(WrapperState::new(node, parent));
        match parent.and_then(|p| self.wrappers.get_mut(p)) {
            Some(owner) => owner.children.push(id),
            None => self.top_level.push(id),
        }
        self.registry.entry(node).or_default().push(id);
        id
    }

    /// Unlink a wrapper from the arena, the registry and its owner.
    fn remove(&mut self, id: WrapperId) -> Option<WrapperState<N>> {
        let w = self.wrappers.remove(id)?;

        let now_empty = match self.registry.get_mut(&w.node) {
            Some(ids) => {
                ids.retain(|other| *other != id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.registry.shift_remove(&w.node);
        }

        match w.parent.and_then(|p| self.wrappers.get_mut(p)) {
            Some(parent) => parent.children.retain(|child| *child != id),
            None => self.top_level.retain(|other| *other != id),
        }

        Some(w)
    }
}

/// Which hook list is being dispatched.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Mount,
    BeforeUnmount,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Mount => "on_mount",
            Phase::BeforeUnmount => "before_unmount",
        })
    }
}

// ----------------------------------------------------------------------------
// Operations on shared state (used by Coordinator and Wrapper)
// ----------------------------------------------------------------------------

pub(super) fn register<N: NodeKey>(
    shared: &SharedRef<N>,
    node: N,
    parent: Option<WrapperId>,
) -> Result<WrapperId> {
    let id = {
        let mut st = shared.borrow_mut();
        if let Some(p) = parent {
            st.live_mut(p)?;
        }
        st.insert(node, parent)
    };

    debug!(wrapper = ?id, node = ?node, parent = ?parent, "wrapper registered");
    Ok(id)
}

pub(super) fn state_of<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> MountState {
    shared
        .borrow()
        .wrappers
        .get(id)
        .map(|w| w.state)
        .unwrap_or(MountState::Disposed)
}

pub(super) fn ensure_live<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> Result<()> {
    shared.borrow_mut().live_mut(id).map(|_| ())
}

pub(super) fn add_on_mount<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId, hook: Hook) -> Result<()> {
    let fire_now = {
        let mut st = shared.borrow_mut();
        let w = st.live_mut(id)?;
        w.on_mount.push(Rc::clone(&hook));
        w.state == MountState::Mounted
    };
    if fire_now {
        run_hooks(shared, id, Phase::Mount, vec![hook]);
    }
    Ok(())
}

pub(super) fn add_before_unmount<N: NodeKey>(
    shared: &SharedRef<N>,
    id: WrapperId,
    hook: Hook,
) -> Result<()> {
    shared.borrow_mut().live_mut(id)?.before_unmount.push(hook);
    Ok(())
}

/// Hand `resource` to the wrapper. On a disposed wrapper the resource is
/// released immediately and the call fails.
pub(super) fn own<N: NodeKey>(
    shared: &SharedRef<N>,
    id: WrapperId,
    resource: Box<dyn Disposable>,
) -> Result<()> {
    let rejected = {
        let mut st = shared.borrow_mut();
        match st.live_mut(id) {
            Ok(w) => {
                w.owned.push(resource);
                None
            }
            Err(err) => Some((err, resource)),
        }
    };
    match rejected {
        Some((err, resource)) => {
            resource.dispose();
            Err(err)
        }
        None => Ok(()),
    }
}

pub(super) fn bind<N: NodeKey>(
    shared: &SharedRef<N>,
    id: WrapperId,
    key: &'static str,
    resource: Box<dyn Disposable>,
) -> Result<()> {
    let outcome = {
        let mut st = shared.borrow_mut();
        match st.live_mut(id) {
            Ok(w) => Ok(w.bindings.insert(key, resource)),
            Err(err) => Err((err, resource)),
        }
    };
    match outcome {
        Ok(previous) => {
            if let Some(previous) = previous {
                previous.dispose();
            }
            Ok(())
        }
        Err((err, resource)) => {
            resource.dispose();
            Err(err)
        }
    }
}

pub(super) fn unbind<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId, key: &str) -> Result<bool> {
    let removed = shared.borrow_mut().live_mut(id)?.bindings.shift_remove(key);
    Ok(match removed {
        Some(resource) => {
            resource.dispose();
            true
        }
        None => false,
    })
}

pub(super) fn node_of<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> Option<N> {
    shared.borrow().wrappers.get(id).map(|w| w.node)
}

pub(super) fn parent_of<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> Option<WrapperId> {
    shared.borrow().wrappers.get(id).and_then(|w| w.parent)
}

pub(super) fn children_of<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> Vec<WrapperId> {
    shared
        .borrow()
        .wrappers
        .get(id)
        .map(|w| w.children.clone())
        .unwrap_or_default()
}

/// Run `hooks` in order, isolating panics when configured to.
fn run_hooks<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId, phase: Phase, hooks: Vec<Hook>) {
    let isolate = shared.borrow().config.isolate_hook_panics;

    for hook in hooks {
        let Ok(mut callback) = hook.try_borrow_mut() else {
            warn!(wrapper = ?id, phase = %phase, "hook re-entered while running, skipped");
            continue;
        };

        if !isolate {
            (&mut *callback)();
            continue;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (&mut *callback)()));
        if let Err(payload) = outcome {
            let err = Error::from_panic(payload);
            error!(wrapper = ?id, phase = %phase, error = %err, "lifecycle hook panicked");
            shared.borrow_mut().hook_errors.push(err);
        }
    }
}

/// Unmounted → Mounted. Returns whether the transition happened.
fn mount<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> bool {
    let hooks = {
        let mut st = shared.borrow_mut();
        let Some(w) = st.wrappers.get_mut(id) else {
            return false;
        };
        if w.disposing || w.state != MountState::Unmounted {
            return false;
        }
        w.state = MountState::Mounted;
        w.ever_mounted = true;
        w.detached_ticks = 0;
        w.on_mount.clone()
    };

    debug!(wrapper = ?id, hooks = hooks.len(), "mounted");
    run_hooks(shared, id, Phase::Mount, hooks);
    true
}

/// Mounted → Unmounted, keeping the wrapper reusable.
fn detach<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId) -> bool {
    let hooks = {
        let mut st = shared.borrow_mut();
        let Some(w) = st.wrappers.get_mut(id) else {
            return false;
        };
        if w.disposing || w.state != MountState::Mounted {
            return false;
        }
        w.state = MountState::Unmounted;
        w.detached_ticks = 0;
        w.before_unmount.clone()
    };

    debug!(wrapper = ?id, hooks = hooks.len(), "detached");
    run_hooks(shared, id, Phase::BeforeUnmount, hooks);
    true
}

/// Dispose `id` and its owned subtree, children first.
///
/// Appends every wrapper actually disposed to `disposed`, in teardown order.
/// A no-op for wrappers that are gone or already being disposed.
pub(super) fn dispose<N: NodeKey>(shared: &SharedRef<N>, id: WrapperId, disposed: &mut Vec<WrapperId>) {
    let children = {
        let mut st = shared.borrow_mut();
        let Some(w) = st.wrappers.get_mut(id) else {
            return;
        };
        if w.disposing {
            return;
        }
        w.disposing = true;
        w.children.clone()
    };

    for child in children {
        dispose(shared, child, disposed);
    }

    let hooks = {
        let mut st = shared.borrow_mut();
        match st.wrappers.get_mut(id) {
            Some(w) if w.state == MountState::Mounted => {
                w.state = MountState::Unmounted;
                w.before_unmount.clone()
            }
            _ => Vec::new(),
        }
    };
    run_hooks(shared, id, Phase::BeforeUnmount, hooks);

    let removed = shared.borrow_mut().remove(id);
    if let Some(w) = removed {
        let released = w.owned.len() + w.bindings.len();
        for resource in w.owned {
            resource.dispose();
        }
        for (_, resource) in w.bindings {
            resource.dispose();
        }
        debug!(wrapper = ?id, released, "disposed");
    }
    disposed.push(id);
}

/// One observation tick over the owner subtrees rooted at `starts`.
pub(super) fn observe_from<N, H>(shared: &SharedRef<N>, host: &H, starts: &[WrapperId]) -> Transitions
where
    N: NodeKey,
    H: Host<Node = N> + ?Sized,
{
    let (snapshot, grace) = {
        let st = shared.borrow();
        let snapshot: Vec<(WrapperId, bool)> = st
            .preorder(starts)
            .into_iter()
            .filter_map(|id| {
                st.wrappers
                    .get(id)
                    .map(|w| (id, host.contains(st.root, w.node)))
            })
            .collect();
        (snapshot, st.config.detached_grace_ticks)
    };

    let mut transitions = Transitions::default();

    for &(id, reachable) in snapshot.iter().rev() {
        if !reachable && detach(shared, id) {
            transitions.detached.push(id);
        }
    }

    if let Some(grace) = grace {
        let expired: Vec<WrapperId> = {
            let mut st = shared.borrow_mut();
            snapshot
                .iter()
                .filter(|(_, reachable)| !reachable)
                .filter_map(|&(id, _)| {
                    let w = st.wrappers.get_mut(id)?;
                    if w.disposing || !w.ever_mounted || w.state != MountState::Unmounted {
                        return None;
                    }
                    w.detached_ticks += 1;
                    (w.detached_ticks > grace).then_some(id)
                })
                .collect()
        };
        for id in expired {
            dispose(shared, id, &mut transitions.disposed);
        }
    }

    for &(id, reachable) in &snapshot {
        if reachable && mount(shared, id) {
            transitions.mounted.push(id);
        }
    }

    let tick = {
        let mut st = shared.borrow_mut();
        st.ticks += 1;
        st.ticks
    };
    debug!(
        tick,
        observed = snapshot.len(),
        mounted = transitions.mounted.len(),
        detached = transitions.detached.len(),
        disposed = transitions.disposed.len(),
        "observation tick"
    );

    transitions
}

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

/// Transitions fired by one observation tick, in firing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transitions {
    /// Wrappers that went Unmounted → Mounted.
    pub mounted: Vec<WrapperId>,
    /// Wrappers that went Mounted → Unmounted.
    pub detached: Vec<WrapperId>,
    /// Wrappers disposed after exceeding the detached grace period.
    pub disposed: Vec<WrapperId>,
}

impl Transitions {
    /// Whether the tick changed nothing.
    pub fn is_empty(&self) -> bool {
        self.mounted.is_empty() && self.detached.is_empty() && self.disposed.is_empty()
    }
}

/// Tracks wrappers bound to structural nodes and runs their lifecycle.
///
/// Cloning a `Coordinator` yields another handle to the same state.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::lifecycle::{Coordinator, MemoryTree};
///
/// let mut tree = MemoryTree::new();
/// let coordinator = Coordinator::new(tree.root());
///
/// let node = tree.create("div");
/// let wrapper = coordinator.wrap(node);
/// let mounted = Rc::new(Cell::new(0));
/// {
///     let mounted = mounted.clone();
///     wrapper.on_mount(move || mounted.set(mounted.get() + 1)).unwrap();
/// }
///
/// tree.append_child(tree.root(), node);
/// coordinator.observe(&tree);
/// assert_eq!(mounted.get(), 1);
/// assert!(wrapper.is_mounted());
/// ```
pub struct Coordinator<N: NodeKey> {
    shared: SharedRef<N>,
}

impl<N: NodeKey> Coordinator<N> {
    /// Create a coordinator observing reachability from `root`.
    pub fn new(root: N) -> Self {
        Self::with_config(root, CoordinatorConfig::default())
    }

    /// Create a coordinator with explicit configuration.
    pub fn with_config(root: N, config: CoordinatorConfig) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                root,
                config,
                wrappers: SlotMap::with_key(),
                registry: IndexMap::new(),
                top_level: Vec::new(),
                hook_errors: Vec::new(),
                ticks: 0,
            })),
        }
    }

    /// The root container.
    pub fn root(&self) -> N {
        self.shared.borrow().root
    }

    /// The active configuration.
    pub fn config(&self) -> CoordinatorConfig {
        self.shared.borrow().config.clone()
    }

    /// Bind a new top-level wrapper to `node`.
    ///
    /// Disposal cascades along the owner tree only: wrappers created with
    /// [`Wrapper::child`] go down with their owner. A top-level wrapper on a
    /// descendant node, or a second wrapper on the same node, is not reached
    /// by another wrapper's `unmount()`. Once its node leaves the tree such a
    /// wrapper is detached, and with
    /// [`detached_grace_ticks`](CoordinatorConfig::detached_grace_ticks) set it
    /// is disposed after the grace period.
    pub fn wrap(&self, node: N) -> Wrapper<N> {
        let id = self.shared.borrow_mut().insert(node, None);
        debug!(wrapper = ?id, node = ?node, "wrapper registered");
        Wrapper::from_parts(id, node, Rc::clone(&self.shared))
    }

    /// Look up a live wrapper by id.
    pub fn get(&self, id: WrapperId) -> Option<Wrapper<N>> {
        let node = node_of(&self.shared, id)?;
        Some(Wrapper::from_parts(id, node, Rc::clone(&self.shared)))
    }

    /// All live wrappers bound to `node`, in creation order.
    pub fn wrappers_for(&self, node: N) -> Vec<Wrapper<N>> {
        let ids: Vec<WrapperId> = self
            .shared
            .borrow()
            .registry
            .get(&node)
            .map(|ids| ids.to_vec())
            .unwrap_or_default();
        ids.into_iter()
            .map(|id| Wrapper::from_parts(id, node, Rc::clone(&self.shared)))
            .collect()
    }

    /// Run one observation tick over every live wrapper.
    pub fn observe<H>(&self, host: &H) -> Transitions
    where
        H: Host<Node = N> + ?Sized,
    {
        let starts = self.shared.borrow().top_level.clone();
        observe_from(&self.shared, host, &starts)
    }

    /// Dispose every wrapper, top-level wrappers in creation order.
    pub fn unmount_all(&self) -> Vec<WrapperId> {
        let starts = self.shared.borrow().top_level.clone();
        let mut disposed = Vec::new();
        for id in starts {
            dispose(&self.shared, id, &mut disposed);
        }
        disposed
    }

    /// Drain the hook failures recorded since the last call.
    pub fn take_hook_errors(&self) -> Vec<Error> {
        std::mem::take(&mut self.shared.borrow_mut().hook_errors)
    }

    /// Number of live wrappers.
    pub fn len(&self) -> usize {
        self.shared.borrow().wrappers.len()
    }

    /// Whether no wrappers are live.
    pub fn is_empty(&self) -> bool {
        self.shared.borrow().wrappers.is_empty()
    }

    /// Number of distinct nodes in the registry.
    pub fn registered_nodes(&self) -> usize {
        self.shared.borrow().registry.len()
    }

    /// Number of observation ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.shared.borrow().ticks
    }
}

impl<N: NodeKey> Clone for Coordinator<N> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<N: NodeKey> fmt::Debug for Coordinator<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.borrow();
        f.debug_struct("Coordinator")
            .field("root", &st.root)
            .field("wrappers", &st.wrappers.len())
            .field("registered_nodes", &st.registry.len())
            .field("ticks", &st.ticks)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
