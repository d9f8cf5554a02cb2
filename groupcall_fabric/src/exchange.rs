// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The side channel two peers swap their buffer addressing over before any
//! one-sided write can happen.
//!
//! The record on the wire is fixed size, two big-endian 64-bit words: the
//! authorization key of the sender's receive buffer, then its virtual address.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

use crate::{ConnectionErr, FabricErr, NodeId};

/// Addressing and authorization of one side's receive buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MrConnectionData {
    /// Key a peer must present to write the buffer
    pub mr_key: u64,
    /// Virtual address of the buffer
    pub vaddr: u64,
}

impl MrConnectionData {
    /// Size of the record on the wire
    pub const WIRE_LEN: usize = 16;

    /// Encode to network byte order
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u64(self.mr_key);
        buf.put_u64(self.vaddr);
        buf.freeze()
    }

    /// Decode a record received from a peer
    pub fn decode(mut buf: &[u8]) -> Result<Self, FabricErr> {
        if buf.len() != Self::WIRE_LEN {
            return Err(FabricErr::MalformedRecord(buf.len()));
        }
        let mr_key = buf.get_u64();
        let vaddr = buf.get_u64();
        Ok(Self { mr_key, vaddr })
    }
}

/// A reliable channel, separate from the fabric, for swapping small records with a
/// peer
#[async_trait]
pub trait OobExchange: Send + Sync {
    /// Send `local` to `remote` and return the record `remote` sent in return.
    /// Both sides call this concurrently with records of the same length.
    async fn exchange(&self, remote: NodeId, local: &[u8]) -> Result<Vec<u8>, FabricErr>;
}

/// Swap [MrConnectionData] with `remote` over `exchange`
pub async fn exchange_record(
    exchange: &dyn OobExchange,
    remote: NodeId,
    local: &MrConnectionData,
) -> Result<MrConnectionData, FabricErr> {
    let received = exchange.exchange(remote, &local.encode()).await?;
    MrConnectionData::decode(&received)
}

/// [OobExchange] over one TCP stream per peer
#[derive(Default)]
pub struct TcpExchange {
    peers: DashMap<NodeId, Arc<Mutex<TcpStream>>>,
}

impl TcpExchange {
    /// Create an exchange with no peers
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `stream` for exchanges with `nid`, replacing any previous stream
    pub fn add_peer(&self, nid: NodeId, stream: TcpStream) {
        if let Err(err) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY on the stream to node {nid}: {err}");
        }
        self.peers.insert(nid, Arc::new(Mutex::new(stream)));
    }

    /// Open a stream to `nid` at `addr`
    pub async fn connect<A: ToSocketAddrs>(&self, nid: NodeId, addr: A) -> Result<(), FabricErr> {
        let stream = TcpStream::connect(addr).await?;
        log::info!("Side channel to node {nid} connected");
        self.add_peer(nid, stream);
        Ok(())
    }

    /// Close the stream to `nid`. Returns [true] if there was one.
    pub fn remove_peer(&self, nid: NodeId) -> bool {
        self.peers.remove(&nid).is_some()
    }
}

#[async_trait]
impl OobExchange for TcpExchange {
    async fn exchange(&self, remote: NodeId, local: &[u8]) -> Result<Vec<u8>, FabricErr> {
        let peer = match self.peers.get(&remote) {
            Some(entry) => entry.value().clone(),
            None => return Err(ConnectionErr::Removed(remote).into()),
        };
        let mut stream = peer.lock().await;
        stream.write_all(local).await?;
        stream.flush().await?;
        let mut received = vec![0u8; local.len()];
        stream.read_exact(&mut received).await?;
        log::trace!("Exchanged {} bytes with node {remote}", local.len());
        Ok(received)
    }
}
