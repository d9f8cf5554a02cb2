// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The reading side of a group call: [QueryResults], its [ReplyMap] and the per-node
//! [ReplyFuture]s

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::concurrency::{self, Duration, Instant, OneshotReceiver, TryRecvError};
use crate::{NodeId, NodeList, RpcErr};

/// The outcome of a single destination
pub type Reply<T> = Result<T, RpcErr>;

/// How long [QueryResults::get_map] waits per attempt before logging and trying again
pub const DEFAULT_MAP_RETRY_INTERVAL: Duration = Duration::from_secs(5 * 60);

enum SlotState<T> {
    Waiting(OneshotReceiver<Reply<T>>),
    Ready(Reply<T>),
    Retrieved,
}

/// One destination's outcome slot. It moves from waiting, to holding a value or a
/// failure, to retrieved, and never back.
pub struct ReplyFuture<T> {
    node: NodeId,
    state: SlotState<T>,
}

impl<T> ReplyFuture<T> {
    pub(crate) fn new(node: NodeId, port: OneshotReceiver<Reply<T>>) -> Self {
        Self {
            node,
            state: SlotState::Waiting(port),
        }
    }

    /// The destination this slot belongs to
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Returns [true] if the outcome has arrived and hasn't been retrieved yet.
    /// Never blocks.
    pub fn is_ready(&mut self) -> bool {
        let node = self.node;
        let next = match &mut self.state {
            SlotState::Waiting(port) => match port.try_recv() {
                Ok(reply) => Some(reply),
                Err(TryRecvError::Closed) => Some(Err(RpcErr::ReplyDropped(node))),
                Err(TryRecvError::Empty) => None,
            },
            _ => None,
        };
        if let Some(reply) = next {
            self.state = SlotState::Ready(reply);
        }
        matches!(self.state, SlotState::Ready(_))
    }

    /// Returns [true] if the outcome was already consumed with [ReplyFuture::get]
    pub fn is_retrieved(&self) -> bool {
        matches!(self.state, SlotState::Retrieved)
    }

    /// Wait up to `dur` for the outcome to arrive
    ///
    /// Returns [true] if the outcome is ready to be retrieved
    pub async fn wait_for(&mut self, dur: Duration) -> bool {
        let node = self.node;
        let next = match &mut self.state {
            SlotState::Waiting(port) => match concurrency::timeout(dur, port).await {
                Ok(Ok(reply)) => Some(reply),
                Ok(Err(_closed)) => Some(Err(RpcErr::ReplyDropped(node))),
                Err(_timeout) => None,
            },
            _ => None,
        };
        if let Some(reply) = next {
            self.state = SlotState::Ready(reply);
        }
        matches!(self.state, SlotState::Ready(_))
    }

    /// Wait for the outcome and take it. Only this slot is waited on, so it is never
    /// held up by other destinations of the same call.
    ///
    /// Panics if the outcome was already retrieved.
    pub async fn get(&mut self) -> Reply<T> {
        let node = self.node;
        let next = match &mut self.state {
            SlotState::Waiting(port) => Some(match port.await {
                Ok(reply) => reply,
                Err(_closed) => Err(RpcErr::ReplyDropped(node)),
            }),
            _ => None,
        };
        if let Some(reply) = next {
            self.state = SlotState::Ready(reply);
        }

        match std::mem::replace(&mut self.state, SlotState::Retrieved) {
            SlotState::Ready(reply) => reply,
            SlotState::Retrieved => {
                panic!("The outcome for node {} has already been retrieved", node)
            }
            SlotState::Waiting(_) => unreachable!("slot was resolved above"),
        }
    }
}

impl<T> std::fmt::Debug for ReplyFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            SlotState::Waiting(_) => "Waiting",
            SlotState::Ready(_) => "Ready",
            SlotState::Retrieved => "Retrieved",
        };
        f.debug_struct("ReplyFuture")
            .field("node", &self.node)
            .field("state", &state)
            .finish()
    }
}

/// The per-destination outcome slots of one call. The key set is exactly the
/// destination set and is fixed once the map exists.
pub struct ReplyMap<T> {
    rmap: BTreeMap<NodeId, ReplyFuture<T>>,
}

impl<T> ReplyMap<T> {
    pub(crate) fn new(rmap: BTreeMap<NodeId, ReplyFuture<T>>) -> Self {
        Self { rmap }
    }

    /// Returns [true] if `nid` is a destination whose outcome is ready to be read
    pub fn valid(&mut self, nid: NodeId) -> bool {
        self.rmap
            .get_mut(&nid)
            .map(|slot| slot.is_ready())
            .unwrap_or(false)
    }

    /// Returns [true] if the call was sent to `nid`, regardless of whether it replied
    pub fn contains(&self, nid: NodeId) -> bool {
        self.rmap.contains_key(&nid)
    }

    /// The destination set, in ascending order
    pub fn nodes(&self) -> NodeList {
        self.rmap.keys().copied().collect()
    }

    /// Number of destinations
    pub fn len(&self) -> usize {
        self.rmap.len()
    }

    /// Returns [true] if the call had no destinations
    pub fn is_empty(&self) -> bool {
        self.rmap.is_empty()
    }

    /// The outcome slot of a destination, if `nid` is one
    pub fn reply(&mut self, nid: NodeId) -> Option<&mut ReplyFuture<T>> {
        self.rmap.get_mut(&nid)
    }

    /// Iterate the outcome slots. The slots are disjoint borrows, so several of them
    /// can be awaited at once.
    pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, NodeId, ReplyFuture<T>> {
        self.rmap.iter_mut()
    }

    /// Wait for `nid`'s outcome and take it
    ///
    /// Panics if `nid` isn't a destination of this call or was already retrieved
    pub async fn get(&mut self, nid: NodeId) -> Reply<T> {
        match self.rmap.get_mut(&nid) {
            Some(slot) => slot.get().await,
            None => panic!("Node {} is not a destination of this call", nid),
        }
    }

    /// Wait up to `dur` for `nid`'s outcome. Returns [true] if it's ready.
    ///
    /// Panics if `nid` isn't a destination of this call
    pub async fn wait_for(&mut self, nid: NodeId, dur: Duration) -> bool {
        match self.rmap.get_mut(&nid) {
            Some(slot) => slot.wait_for(dur).await,
            None => panic!("Node {} is not a destination of this call", nid),
        }
    }

    /// Break the map up into owned slots, e.g. to await different nodes on different
    /// tasks
    pub fn into_futures(self) -> BTreeMap<NodeId, ReplyFuture<T>> {
        self.rmap
    }
}

impl<T> IntoIterator for ReplyMap<T> {
    type Item = (NodeId, ReplyFuture<T>);
    type IntoIter = btree_map::IntoIter<NodeId, ReplyFuture<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rmap.into_iter()
    }
}

impl<T> std::fmt::Debug for ReplyMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.rmap.values()).finish()
    }
}

/// The future side of one group call, bound to a [super::PendingResults]
///
/// Resolves in two stages. First the destination set becomes known (see
/// [QueryResults::wait]), which materializes the [ReplyMap]. Once cached, the map is
/// never replaced. Then each destination's outcome is read on its own with
/// [QueryResults::get].
pub struct QueryResults<T> {
    pending_rmap: Option<OneshotReceiver<ReplyMap<T>>>,
    replies: ReplyMap<T>,
    resolved: bool,
    retry_interval: Duration,
}

impl<T> QueryResults<T> {
    pub(crate) fn new(pending_rmap: OneshotReceiver<ReplyMap<T>>) -> Self {
        Self {
            pending_rmap: Some(pending_rmap),
            replies: ReplyMap::new(BTreeMap::new()),
            resolved: false,
            retry_interval: DEFAULT_MAP_RETRY_INTERVAL,
        }
    }

    /// Set how long [QueryResults::get_map] waits per attempt before logging and
    /// waiting again
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// The per-attempt wait of [QueryResults::get_map]
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    fn install(&mut self, replies: ReplyMap<T>) {
        self.replies = replies;
        self.resolved = true;
        self.pending_rmap = None;
    }

    /// Non-blocking attempt at the first stage
    fn poll_map(&mut self) -> Result<bool, RpcErr> {
        if self.resolved {
            return Ok(true);
        }
        let polled = match self.pending_rmap.as_mut() {
            Some(port) => port.try_recv(),
            None => return Err(RpcErr::CallAbandoned),
        };
        match polled {
            Ok(replies) => {
                self.install(replies);
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Closed) => {
                self.pending_rmap = None;
                Err(RpcErr::CallAbandoned)
            }
        }
    }

    /// Wait for the first stage, optionally bounded
    async fn resolve_map(&mut self, limit: Option<Duration>) -> Result<bool, RpcErr> {
        if self.resolved {
            return Ok(true);
        }
        let port = match self.pending_rmap.as_mut() {
            Some(port) => port,
            None => return Err(RpcErr::CallAbandoned),
        };
        let received = match limit {
            Some(dur) => match concurrency::timeout(dur, port).await {
                Ok(received) => received,
                Err(_timeout) => return Ok(false),
            },
            None => port.await,
        };
        match received {
            Ok(replies) => {
                self.install(replies);
                Ok(true)
            }
            Err(_closed) => {
                self.pending_rmap = None;
                Err(RpcErr::CallAbandoned)
            }
        }
    }

    /// Wait up to `dur` for the destination set to become known.
    ///
    /// Returns [Ok(Some(map))] once it's known (immediately on later calls),
    /// [Ok(None)] on timeout and [Err(RpcErr::CallAbandoned)] if the promise side
    /// was dropped before fulfilling the map.
    pub async fn wait(&mut self, dur: Duration) -> Result<Option<&mut ReplyMap<T>>, RpcErr> {
        if self.resolve_map(Some(dur)).await? {
            Ok(Some(&mut self.replies))
        } else {
            Ok(None)
        }
    }

    /// Block until the destination set is known, then return the map.
    ///
    /// This never gives up: every [QueryResults::retry_interval] without a result is
    /// logged and the wait starts over. It only fails if the call is abandoned.
    pub async fn get_map(&mut self) -> Result<&mut ReplyMap<T>, RpcErr> {
        let started = Instant::now();
        while !self.resolve_map(Some(self.retry_interval)).await? {
            log::warn!(
                "Destinations of an outstanding call still unknown after {:?}, waiting again",
                started.elapsed()
            );
        }
        Ok(&mut self.replies)
    }

    /// Returns [true] if `nid` is a destination whose outcome is ready to be read.
    /// Never blocks.
    pub fn valid(&mut self, nid: NodeId) -> bool {
        matches!(self.poll_map(), Ok(true)) && self.replies.valid(nid)
    }

    /// Returns [true] if the call was sent to `nid`, regardless of its outcome. Always
    /// [false] while the destination set is still unknown. Never blocks.
    pub fn contains(&mut self, nid: NodeId) -> bool {
        matches!(self.poll_map(), Ok(true)) && self.replies.contains(nid)
    }

    /// Wait for the destination set (if not known yet) and then for `nid`'s outcome
    /// only. Returns the value or the failure that node's slot was resolved with.
    ///
    /// Panics if `nid` isn't a destination of this call or its outcome was already
    /// retrieved.
    pub async fn get(&mut self, nid: NodeId) -> Reply<T> {
        self.resolve_map(None).await?;
        self.replies.get(nid).await
    }

    /// Wait for the destination set and hand over the whole [ReplyMap]
    pub async fn into_reply_map(mut self) -> Result<ReplyMap<T>, RpcErr> {
        self.resolve_map(None).await?;
        Ok(self.replies)
    }
}

/// The future side of a call with no return value, bound to a [super::PendingCast].
/// Only the destination set is tracked.
pub struct CastResults {
    pending_dests: Option<OneshotReceiver<NodeList>>,
    destinations: Option<NodeList>,
}

impl CastResults {
    pub(crate) fn new(pending_dests: OneshotReceiver<NodeList>) -> Self {
        Self {
            pending_dests: Some(pending_dests),
            destinations: None,
        }
    }

    /// The destination set if it's already known. Never blocks.
    pub fn destinations(&mut self) -> Option<&[NodeId]> {
        if self.destinations.is_none() {
            if let Some(port) = self.pending_dests.as_mut() {
                match port.try_recv() {
                    Ok(dests) => {
                        self.destinations = Some(dests);
                        self.pending_dests = None;
                    }
                    Err(TryRecvError::Closed) => self.pending_dests = None,
                    Err(TryRecvError::Empty) => {}
                }
            }
        }
        self.destinations.as_deref()
    }

    /// Wait up to `dur` for the destination set to become known
    pub async fn wait(&mut self, dur: Duration) -> Result<Option<&[NodeId]>, RpcErr> {
        if self.destinations.is_none() {
            let port = match self.pending_dests.as_mut() {
                Some(port) => port,
                None => return Err(RpcErr::CallAbandoned),
            };
            match concurrency::timeout(dur, port).await {
                Ok(Ok(dests)) => {
                    self.destinations = Some(dests);
                    self.pending_dests = None;
                }
                Ok(Err(_closed)) => {
                    self.pending_dests = None;
                    return Err(RpcErr::CallAbandoned);
                }
                Err(_timeout) => return Ok(None),
            }
        }
        Ok(self.destinations.as_deref())
    }
}
