// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Per-peer RDMA connections and the manager which owns them.
//!
//! The [ConnectionManager] holds the only strong references. Everything else,
//! memory regions included, asks it for a [Weak] handle and has to upgrade that
//! handle on every use, so a removed connection is noticed the next time it's
//! touched.

use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::NodeId;

/// A reliable connection to one peer, capable of one-sided writes
pub trait RdmaConnection: Send + Sync {
    /// Returns [true] once the connection has failed and can't carry traffic
    fn is_broken(&self) -> bool;

    /// Write `size` bytes from `local_addr` to `remote_addr` on the peer, presenting
    /// `remote_key` to the peer and `local_key` to the local fabric. With
    /// `with_completion` a local completion is requested.
    ///
    /// Returns [true] if the write was posted
    fn write_remote(
        &self,
        local_addr: u64,
        remote_addr: u64,
        size: usize,
        with_completion: bool,
        remote_key: u64,
        local_key: u64,
    ) -> bool;

    /// Round trip with the peer, completing once every earlier write has landed
    fn sync(&self) -> bool;
}

/// Owner of the connection to every peer
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<NodeId, Arc<dyn RdmaConnection>>,
}

impl ConnectionManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of the connection to `nid`, returning the one it replaces
    pub fn add<C>(&self, nid: NodeId, connection: Arc<C>) -> Option<Arc<dyn RdmaConnection>>
    where
        C: RdmaConnection + 'static,
    {
        log::debug!("Adding RDMA connection to node {nid}");
        self.connections.insert(nid, connection)
    }

    /// Drop the connection to `nid`. Weak handles given out for it stop upgrading
    /// once the last strong reference is gone.
    pub fn remove(&self, nid: NodeId) -> Option<Arc<dyn RdmaConnection>> {
        let removed = self.connections.remove(&nid).map(|(_, conn)| conn);
        if removed.is_some() {
            log::info!("RDMA connection to node {nid} removed");
        }
        removed
    }

    /// A weak handle to the connection to `nid`, [None] if there is none
    pub fn get(&self, nid: NodeId) -> Option<Weak<dyn RdmaConnection>> {
        self.connections
            .get(&nid)
            .map(|entry| Arc::downgrade(entry.value()))
    }

    /// Returns [true] if a connection to `nid` is held
    pub fn contains(&self, nid: NodeId) -> bool {
        self.connections.contains_key(&nid)
    }

    /// The peers a connection is held to, in no particular order
    pub fn nodes(&self) -> Vec<NodeId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of connections held
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns [true] if no connection is held
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
