// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A registered send/receive buffer pair bound to one peer's receive buffer.

use std::sync::{Arc, Weak};

use crate::exchange::exchange_record;
use crate::fabric::{self, AccessFlags, FabricContext, FatalAction, RegisteredMemory};
use crate::{
    fatal, ConnectionErr, ConnectionManager, MrConnectionData, NodeId, OobExchange,
    RdmaConnection,
};

/// A pair of registered buffers plus the peer's receive buffer addressing, ready
/// for one-sided writes of `send_buf[offset..offset + size]` to the same offset of
/// the peer's receive buffer
pub struct MemoryRegion {
    remote_id: NodeId,
    connection: Weak<dyn RdmaConnection>,
    // registrations are released before the buffers they cover
    write_mr: Box<dyn RegisteredMemory>,
    read_mr: Box<dyn RegisteredMemory>,
    send_buf: Box<[u8]>,
    recv_buf: Box<[u8]>,
    size: usize,
    local_write_key: u64,
    local_read_key: u64,
    remote_write_key: u64,
    remote_recv_buf: u64,
}

impl MemoryRegion {
    /// Register `send_buf` and `recv_buf` and swap addressing with `remote_id`
    ///
    /// Returns [ConnectionErr::Removed] if there is no connection to `remote_id` and
    /// [ConnectionErr::Broken] if it has failed. Panics if the buffers differ in size.
    /// Any fabric failure along the way is fatal, see [crate::FatalAction].
    pub async fn new(
        ctx: &FabricContext,
        connections: &ConnectionManager,
        exchange: &dyn OobExchange,
        remote_id: NodeId,
        send_buf: Box<[u8]>,
        recv_buf: Box<[u8]>,
    ) -> Result<Self, ConnectionErr> {
        assert_eq!(
            send_buf.len(),
            recv_buf.len(),
            "Send and receive buffers of a memory region must be the same size"
        );
        let size = send_buf.len();

        let connection = connections
            .get(remote_id)
            .ok_or(ConnectionErr::Removed(remote_id))?;
        match connection.upgrade() {
            None => return Err(ConnectionErr::Removed(remote_id)),
            Some(shared) if shared.is_broken() => return Err(ConnectionErr::Broken(remote_id)),
            Some(_) => {}
        }

        let write_mr = register(ctx, &send_buf, "register memory buffer for write").await;
        let read_mr = register(ctx, &recv_buf, "register memory buffer for read").await;
        let local_write_key = write_mr
            .key()
            .unwrap_or_else(|| ctx.fatal("fail to get write memory key"));
        let local_read_key = read_mr
            .key()
            .unwrap_or_else(|| ctx.fatal("fail to get read memory key"));

        let local = MrConnectionData {
            mr_key: local_read_key,
            vaddr: recv_buf.as_ptr() as u64,
        };
        let remote = match exchange_record(exchange, remote_id, &local).await {
            Ok(remote) => remote,
            Err(err) => ctx.fatal(&format!(
                "exchange connection management info with node {remote_id}: {err}"
            )),
        };
        log::info!(
            "Memory region of {size} bytes with node {remote_id} ready (remote buffer {:#x})",
            remote.vaddr
        );

        Ok(Self {
            remote_id,
            connection,
            write_mr,
            read_mr,
            send_buf,
            recv_buf,
            size,
            local_write_key,
            local_read_key,
            remote_write_key: remote.mr_key,
            remote_recv_buf: remote.vaddr,
        })
    }

    /// [MemoryRegion::new] against the process-wide fabric context. Aborts if
    /// [fabric::init_global] hasn't run.
    pub async fn with_global_fabric(
        connections: &ConnectionManager,
        exchange: &dyn OobExchange,
        remote_id: NodeId,
        send_buf: Box<[u8]>,
        recv_buf: Box<[u8]>,
    ) -> Result<Self, ConnectionErr> {
        let ctx = match fabric::global() {
            Some(ctx) => ctx,
            None => fatal(
                FatalAction::Abort,
                "memory region created before the fabric context was initialized",
            ),
        };
        Self::new(ctx, connections, exchange, remote_id, send_buf, recv_buf).await
    }

    /// Write `send_buf[offset..offset + size]` to the peer's receive buffer at the
    /// same offset. With `with_completion` a local completion is requested.
    ///
    /// Returns whether the fabric accepted the write, or [ConnectionErr::Removed] if
    /// the connection is gone. Panics if the range exceeds the region.
    pub fn write_remote(
        &self,
        offset: usize,
        size: usize,
        with_completion: bool,
    ) -> Result<bool, ConnectionErr> {
        let connection = self.connection()?;
        assert!(
            offset.checked_add(size).map_or(false, |end| end <= self.size),
            "Write of {size} bytes at offset {offset} exceeds the {} byte region",
            self.size
        );
        let local_addr = self.send_buf.as_ptr() as u64 + offset as u64;
        // the peer's address space, only meaningful to its fabric
        let remote_addr = self.remote_recv_buf.wrapping_add(offset as u64);
        Ok(connection.write_remote(
            local_addr,
            remote_addr,
            size,
            with_completion,
            self.remote_write_key,
            self.local_read_key,
        ))
    }

    /// Round trip with the peer over the region's connection
    pub fn sync(&self) -> Result<bool, ConnectionErr> {
        Ok(self.connection()?.sync())
    }

    fn connection(&self) -> Result<Arc<dyn RdmaConnection>, ConnectionErr> {
        self.connection.upgrade().ok_or_else(|| {
            log::warn!("RDMA connection to node {} was removed", self.remote_id);
            ConnectionErr::Removed(self.remote_id)
        })
    }

    /// Returns [true] while the connection this region writes over is still held
    pub fn is_connected(&self) -> bool {
        self.connection.strong_count() > 0
    }

    /// The peer this region writes to
    pub fn remote_id(&self) -> NodeId {
        self.remote_id
    }

    /// Size in bytes of each buffer
    pub fn size(&self) -> usize {
        self.size
    }

    /// The bytes staged for sending
    pub fn send_buf(&self) -> &[u8] {
        &self.send_buf
    }

    /// Mutable access to the bytes staged for sending
    pub fn send_buf_mut(&mut self) -> &mut [u8] {
        &mut self.send_buf
    }

    /// The bytes the peer has written to us
    pub fn recv_buf(&self) -> &[u8] {
        &self.recv_buf
    }

    /// Key of the local send buffer registration
    pub fn local_write_key(&self) -> u64 {
        self.local_write_key
    }

    /// Key of the local receive buffer registration, sent to the peer
    pub fn local_read_key(&self) -> u64 {
        self.local_read_key
    }

    /// Key the peer requires for writes to its receive buffer
    pub fn remote_key(&self) -> u64 {
        self.remote_write_key
    }

    /// Virtual address of the peer's receive buffer
    pub fn remote_addr(&self) -> u64 {
        self.remote_recv_buf
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("remote_id", &self.remote_id)
            .field("size", &self.size)
            .field("write_mr", &self.write_mr.key())
            .field("read_mr", &self.read_mr.key())
            .field("remote_addr", &format_args!("{:#x}", self.remote_recv_buf))
            .finish()
    }
}

async fn register(ctx: &FabricContext, buf: &[u8], what: &str) -> Box<dyn RegisteredMemory> {
    match ctx.register(buf, AccessFlags::ALL).await {
        Ok(mr) => mr,
        Err(err) => ctx.fatal(&format!("{what}: {err}")),
    }
}

#[cfg(test)]
mod tests;
