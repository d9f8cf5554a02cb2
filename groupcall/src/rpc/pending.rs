// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The promise side of a group call

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::query::{CastResults, QueryResults, Reply, ReplyFuture, ReplyMap};
use crate::concurrency::{self, OneshotReceiver, OneshotSender};
use crate::{NodeId, NodeList, RpcErr};

/// The operations every in-flight call supports regardless of its reply type, so
/// membership-change handling can reach all of them through one trait object.
///
/// The default implementations panic: a call type which doesn't override them
/// doesn't support the operation and reaching it is a programming error.
pub trait PendingBase: Send + Sync {
    /// Record the final destination set of the call
    fn fulfill_map(&self, who: &[NodeId]) {
        panic!(
            "fulfill_map({who:?}) is not supported by {}",
            std::any::type_name::<Self>()
        );
    }

    /// The group evicted `removed`. Calls waiting on that node resolve its slot
    /// with [RpcErr::NodeRemovedFromGroup].
    fn set_exception_for_removed_node(&self, removed: NodeId) {
        panic!(
            "set_exception_for_removed_node({removed}) is not supported by {}",
            std::any::type_name::<Self>()
        );
    }
}

struct PendingState<T> {
    map_port: Option<OneshotSender<ReplyMap<T>>>,
    query_port: Option<OneshotReceiver<ReplyMap<T>>>,
    populated_promises: HashMap<NodeId, OneshotSender<Reply<T>>>,
    map_fulfilled: bool,
    dest_nodes: BTreeSet<NodeId>,
    responded_nodes: BTreeSet<NodeId>,
}

/// The promises for a single call: one outcome (value or failure) per destination.
/// The futures live in the matching [QueryResults], see [PendingResults::get_future].
///
/// Ordering rules are enforced with assertions:
///
/// * [PendingResults::fulfill_map] happens exactly once, before anything else
/// * every destination is resolved at most once, by exactly one of
///   [PendingResults::set_value], [PendingResults::set_exception] or
///   [PendingResults::set_exception_for_removed_node]
/// * only destinations can be resolved
pub struct PendingResults<T> {
    state: Mutex<PendingState<T>>,
}

impl<T> PendingResults<T> {
    /// Create the promise set for a new call
    pub fn new() -> Self {
        let (map_port, query_port) = concurrency::oneshot();
        Self {
            state: Mutex::new(PendingState {
                map_port: Some(map_port),
                query_port: Some(query_port),
                populated_promises: HashMap::new(),
                map_fulfilled: false,
                dest_nodes: BTreeSet::new(),
                responded_nodes: BTreeSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retrieve the reader side bound to these promises
    ///
    /// Panics if called more than once
    pub fn get_future(&self) -> QueryResults<T> {
        match self.lock().query_port.take() {
            Some(port) => QueryResults::new(port),
            None => panic!("get_future called more than once for the same call"),
        }
    }

    /// Create one outcome slot per node in `who` and resolve the first stage of the
    /// [QueryResults] with them. From here on only these nodes can be resolved.
    ///
    /// Panics if the map was already fulfilled
    pub fn fulfill_map(&self, who: &[NodeId]) {
        let mut state = self.lock();
        assert!(
            !state.map_fulfilled,
            "fulfill_map called more than once for the same call"
        );
        state.map_fulfilled = true;

        let mut slots = BTreeMap::new();
        for &nid in who {
            if slots.contains_key(&nid) {
                continue;
            }
            let (tx, rx) = concurrency::oneshot();
            state.populated_promises.insert(nid, tx);
            slots.insert(nid, ReplyFuture::new(nid, rx));
        }
        state.dest_nodes.extend(who.iter().copied());
        log::debug!("Reply map fulfilled for destinations {:?}", state.dest_nodes);

        if let Some(port) = state.map_port.take() {
            if port.send(ReplyMap::new(slots)).is_err() {
                log::debug!("Reader of the call is gone, its replies will be discarded");
            }
        }
    }

    fn resolve(&self, nid: NodeId, reply: Reply<T>) {
        let mut state = self.lock();
        Self::resolve_locked(&mut state, nid, reply);
    }

    fn resolve_locked(state: &mut PendingState<T>, nid: NodeId, reply: Reply<T>) {
        assert!(
            state.map_fulfilled,
            "Outcome for node {} set before the reply map was fulfilled", nid
        );
        assert!(
            state.dest_nodes.contains(&nid),
            "Node {} is not a destination of this call", nid
        );
        assert!(
            state.responded_nodes.insert(nid),
            "Node {} already has an outcome", nid
        );

        if let Some(port) = state.populated_promises.remove(&nid) {
            log::trace!("Resolving outcome for node {nid}");
            if port.send(reply).is_err() {
                log::debug!("Reader for node {nid}'s outcome is gone, discarding it");
            }
        }
    }

    /// Resolve `nid`'s slot with a value
    ///
    /// Panics if `nid` is not a destination or already has an outcome
    pub fn set_value(&self, nid: NodeId, value: T) {
        self.resolve(nid, Ok(value));
    }

    /// Resolve `nid`'s slot with a failure, typically [RpcErr::RemoteException]
    /// carrying what the remote handler raised
    ///
    /// Panics if `nid` is not a destination or already has an outcome
    pub fn set_exception(&self, nid: NodeId, err: RpcErr) {
        self.resolve(nid, Err(err));
    }

    /// Resolve `removed`'s slot with [RpcErr::NodeRemovedFromGroup] if it is a
    /// destination that hasn't produced an outcome yet. Does nothing otherwise, so a
    /// reply which already landed always wins.
    ///
    /// Panics if the map wasn't fulfilled yet
    pub fn set_exception_for_removed_node(&self, removed: NodeId) {
        let mut state = self.lock();
        assert!(
            state.map_fulfilled,
            "Removal of node {} delivered before the reply map was fulfilled", removed
        );
        if state.dest_nodes.contains(&removed) && !state.responded_nodes.contains(&removed) {
            log::debug!("Node {removed} left the group before replying");
            Self::resolve_locked(
                &mut state,
                removed,
                Err(RpcErr::NodeRemovedFromGroup(removed)),
            );
        }
    }

    /// Returns [true] once [PendingResults::fulfill_map] has run
    pub fn is_fulfilled(&self) -> bool {
        self.lock().map_fulfilled
    }

    /// The destination set, empty until fulfilled
    pub fn destinations(&self) -> NodeList {
        self.lock().dest_nodes.iter().copied().collect()
    }

    /// Returns [true] if `nid` already produced an outcome
    pub fn has_responded(&self, nid: NodeId) -> bool {
        self.lock().responded_nodes.contains(&nid)
    }
}

impl<T> Default for PendingResults<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingBase for PendingResults<T>
where
    T: Send + 'static,
{
    fn fulfill_map(&self, who: &[NodeId]) {
        PendingResults::fulfill_map(self, who)
    }

    fn set_exception_for_removed_node(&self, removed: NodeId) {
        PendingResults::set_exception_for_removed_node(self, removed)
    }
}

struct CastState {
    map_port: Option<OneshotSender<NodeList>>,
    query_port: Option<OneshotReceiver<NodeList>>,
    map_fulfilled: bool,
}

/// The promise side of a call with no return value. There are no outcomes to
/// resolve, only the destination set is published.
///
/// Removal notifications are accepted and ignored: nothing waits on a node of a
/// fire-and-forget call, and the membership handler must be able to visit every
/// outstanding call without special-casing these.
pub struct PendingCast {
    state: Mutex<CastState>,
}

impl PendingCast {
    /// Create the promise side of a new fire-and-forget call
    pub fn new() -> Self {
        let (map_port, query_port) = concurrency::oneshot();
        Self {
            state: Mutex::new(CastState {
                map_port: Some(map_port),
                query_port: Some(query_port),
                map_fulfilled: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CastState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retrieve the reader side
    ///
    /// Panics if called more than once
    pub fn get_future(&self) -> CastResults {
        match self.lock().query_port.take() {
            Some(port) => CastResults::new(port),
            None => panic!("get_future called more than once for the same call"),
        }
    }

    /// Publish the destination set
    ///
    /// Panics if the destination set was already published
    pub fn fulfill_map(&self, who: &[NodeId]) {
        let mut state = self.lock();
        assert!(
            !state.map_fulfilled,
            "fulfill_map called more than once for the same call"
        );
        state.map_fulfilled = true;
        log::debug!("Cast destinations fulfilled {who:?}");
        if let Some(port) = state.map_port.take() {
            if port.send(who.to_vec()).is_err() {
                log::debug!("Reader of the cast is gone, its destinations will be discarded");
            }
        }
    }
}

impl Default for PendingCast {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingBase for PendingCast {
    fn fulfill_map(&self, who: &[NodeId]) {
        PendingCast::fulfill_map(self, who)
    }

    fn set_exception_for_removed_node(&self, removed: NodeId) {
        log::trace!("Ignoring removal of node {removed} for a call without replies");
    }
}
