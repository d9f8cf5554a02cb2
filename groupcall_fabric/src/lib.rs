// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # Registered memory regions and one-sided writes for `groupcall`
//!
//! A [MemoryRegion] pairs a local send buffer and receive buffer, registered with a
//! network fabric, with the addressing and authorization data of the matching
//! receive buffer on one peer. Once set up, moving bytes to the peer is an
//! `(offset, size)` write: the bytes at `send_buf + offset` land at the peer's
//! `recv_buf + offset` without the peer running any code.
//!
//! Setting up a region goes through three collaborators, all passed in explicitly
//!
//! * a [FabricContext], which registers buffers and hands out authorization keys
//! * a [ConnectionManager], which owns the per-peer [RdmaConnection]s. Regions
//!   only ever hold weak handles, and every operation re-checks that the
//!   connection is still there
//! * an [OobExchange], the reliable side channel the two peers swap their
//!   [MrConnectionData] records over ([TcpExchange] is provided)
//!
//! Fabric failures during setup leave no safe way forward and abort the process
//! (see [FatalAction]), connection failures are returned to the caller.

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod connection;
pub mod errors;
pub mod exchange;
pub mod fabric;
pub mod memory_region;

#[cfg(test)]
pub(crate) mod test_support;

// ============== Re-exports ============== //
pub use connection::{ConnectionManager, RdmaConnection};
pub use errors::FabricErr;
pub use exchange::{MrConnectionData, OobExchange, TcpExchange};
pub use fabric::{
    AccessFlags, FabricConfig, FabricContext, FabricDomain, FatalAction, RegisteredMemory,
};
pub use memory_region::MemoryRegion;

pub use groupcall::{ConnectionErr, NodeId};

/// Log the reason the local networking stack is unusable, then terminate
pub(crate) fn fatal(action: FatalAction, what: &str) -> ! {
    log::error!("Fatal fabric error: {what}");
    match action {
        FatalAction::Abort => std::process::abort(),
        FatalAction::Panic => panic!("Fatal fabric error: {}", what),
    }
}
