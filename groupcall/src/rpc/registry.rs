// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The set of outstanding calls, held type-erased so a membership change can reach
//! all of them.
//!
//! The registry only holds weak references to the promise side. A call disappears
//! from it on its own once the last `Arc` of its promise side is dropped, whatever
//! happened to its reader. Dead entries are pruned on the next notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use super::PendingBase;
use crate::NodeId;

/// Identifies a call within a [PendingRegistry]
pub type CallId = u64;

/// Outstanding calls of any reply type
pub struct PendingRegistry {
    next_id: AtomicU64,
    calls: DashMap<CallId, Weak<dyn PendingBase>>,
}

impl PendingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            calls: DashMap::new(),
        }
    }

    /// Track a call. The call must already have its map fulfilled, removal
    /// notifications assert on that.
    ///
    /// Returns the [CallId] to [PendingRegistry::unregister] it with
    pub fn register<P>(&self, call: &Arc<P>) -> CallId
    where
        P: PendingBase + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<dyn PendingBase> = Arc::downgrade(call) as Weak<dyn PendingBase>;
        self.calls.insert(id, weak);
        id
    }

    /// Fulfill a call's map with its destinations and start tracking it
    pub fn fulfill<P>(&self, call: &Arc<P>, who: &[NodeId]) -> CallId
    where
        P: PendingBase + 'static,
    {
        call.fulfill_map(who);
        self.register(call)
    }

    /// Stop tracking a call. Returns [true] if it was tracked.
    pub fn unregister(&self, id: CallId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Tell every live call that `removed` left the group
    ///
    /// Returns the number of calls notified
    pub fn notify_node_removed(&self, removed: NodeId) -> usize {
        self.calls.retain(|_, call| call.strong_count() > 0);
        // collect first so no map shard is locked while calls run
        let live = self
            .calls
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect::<Vec<_>>();

        log::debug!(
            "Notifying {} outstanding calls of the removal of node {removed}",
            live.len()
        );
        for call in live.iter() {
            call.set_exception_for_removed_node(removed);
        }
        live.len()
    }

    /// Number of calls still alive
    pub fn len(&self) -> usize {
        self.calls
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Returns [true] if no live calls are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
