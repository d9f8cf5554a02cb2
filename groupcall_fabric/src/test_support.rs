// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! In-memory fabric collaborators for tests

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
pub(crate) use tokio::test;

use crate::{
    AccessFlags, FabricConfig, FabricDomain, FabricErr, FatalAction, MrConnectionData, NodeId,
    OobExchange, RdmaConnection, RegisteredMemory,
};

struct StubMemory {
    key: Option<u64>,
}

impl RegisteredMemory for StubMemory {
    fn key(&self) -> Option<u64> {
        self.key
    }
}

/// Default config, except fatal errors unwind so `should_panic` tests can see them
pub(crate) fn panicking_config() -> FabricConfig {
    FabricConfig {
        on_fatal: FatalAction::Panic,
        ..FabricConfig::default()
    }
}

/// Hands out sequential keys starting at 100
#[derive(Default)]
pub(crate) struct StubDomain {
    next_key: AtomicU64,
    busy_attempts: AtomicUsize,
    refuse: AtomicBool,
    keyless: AtomicBool,
    registered: Mutex<Vec<(u64, usize, AccessFlags)>>,
}

impl StubDomain {
    pub(crate) fn new() -> Self {
        Self {
            next_key: AtomicU64::new(100),
            ..Default::default()
        }
    }

    /// Report [FabricErr::TryAgain] for the next `attempts` registrations
    pub(crate) fn busy_for(&self, attempts: usize) {
        self.busy_attempts.store(attempts, Ordering::SeqCst);
    }

    pub(crate) fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub(crate) fn withhold_keys(&self) {
        self.keyless.store(true, Ordering::SeqCst);
    }

    pub(crate) fn registrations(&self) -> Vec<(u64, usize, AccessFlags)> {
        self.registered.lock().unwrap().clone()
    }
}

impl FabricDomain for StubDomain {
    fn register(
        &self,
        addr: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<Box<dyn RegisteredMemory>, FabricErr> {
        if self
            .busy_attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(FabricErr::TryAgain);
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FabricErr::Registration("refused by stub".to_string()));
        }
        self.registered.lock().unwrap().push((addr, len, access));
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        let key = if self.keyless.load(Ordering::SeqCst) {
            None
        } else {
            Some(key)
        };
        Ok(Box::new(StubMemory { key }))
    }
}

/// Arguments of one [RdmaConnection::write_remote] call
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct WriteRecord {
    pub(crate) local_addr: u64,
    pub(crate) remote_addr: u64,
    pub(crate) size: usize,
    pub(crate) with_completion: bool,
    pub(crate) remote_key: u64,
    pub(crate) local_key: u64,
}

/// Records every write and accepts all of them
#[derive(Default)]
pub(crate) struct StubConnection {
    broken: AtomicBool,
    writes: Mutex<Vec<WriteRecord>>,
    syncs: AtomicUsize,
}

impl StubConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub(crate) fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }
}

impl RdmaConnection for StubConnection {
    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn write_remote(
        &self,
        local_addr: u64,
        remote_addr: u64,
        size: usize,
        with_completion: bool,
        remote_key: u64,
        local_key: u64,
    ) -> bool {
        self.writes.lock().unwrap().push(WriteRecord {
            local_addr,
            remote_addr,
            size,
            with_completion,
            remote_key,
            local_key,
        });
        true
    }

    fn sync(&self) -> bool {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Answers every exchange with a fixed peer record
pub(crate) struct StubExchange {
    peer: MrConnectionData,
    fail: bool,
    sent: Mutex<Vec<(NodeId, Vec<u8>)>>,
}

impl StubExchange {
    pub(crate) fn new(peer: MrConnectionData) -> Self {
        Self {
            peer,
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(MrConnectionData { mr_key: 0, vaddr: 0 })
        }
    }

    pub(crate) fn sent(&self) -> Vec<(NodeId, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OobExchange for StubExchange {
    async fn exchange(&self, remote: NodeId, local: &[u8]) -> Result<Vec<u8>, FabricErr> {
        if self.fail {
            return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "stub").into());
        }
        self.sent.lock().unwrap().push((remote, local.to_vec()));
        Ok(self.peer.encode().to_vec())
    }
}
