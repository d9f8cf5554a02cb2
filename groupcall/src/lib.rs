// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! `groupcall`: result tracking for RPCs fanned out across a group of nodes.
//!
//! A single invocation is sent to a *destination set* of nodes which is only known
//! at call time. The caller holds a [rpc::QueryResults] and the reply-delivery path
//! holds the matching [rpc::PendingResults]. Every destination gets its own outcome
//! slot, so one node's reply (or failure) can be read without waiting on the others.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use groupcall::rpc::PendingResults;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pending = Arc::new(PendingResults::<u64>::new());
//!     let mut results = pending.get_future();
//!
//!     // the send path learns who the call went to
//!     pending.fulfill_map(&[1, 2, 3]);
//!
//!     // replies arrive independently
//!     pending.set_value(2, 42);
//!     pending.set_exception_for_removed_node(1);
//!
//!     assert_eq!(results.get(2).await.unwrap(), 42);
//!     assert!(results.get(1).await.unwrap_err().is_node_removed());
//! }
//! ```
//!
//! ## Membership changes
//!
//! When the group evicts a node, every outstanding call must learn about it. Calls
//! of any return type implement [rpc::PendingBase], and a [rpc::PendingRegistry]
//! holds them type-erased so a single handler can fan the removal out.
//!
//! ## Framing
//!
//! Every RPC message carries a fixed preamble (payload size, [Opcode], sender),
//! see [header].

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod concurrency;
pub mod errors;
pub mod header;
pub mod rpc;


// re-exports
pub use errors::{ConnectionErr, RemoteCause, RpcErr};
pub use header::{extra_alloc, header_space, populate_header, retrieve_header, Header, MessageBuf};
pub use rpc::{
    CastResults, PendingBase, PendingCast, PendingRegistry, PendingResults, QueryResults,
    ReplyFuture, ReplyMap,
};

/// A node's identifier, unique within a group epoch
pub type NodeId = u32;

/// The list of nodes a single call was sent to
pub type NodeList = Vec<NodeId>;

/// Identifies a registered remote-callable function. Totally ordered so it can key
/// an ordered map of handlers.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Opcode(pub u64);

impl From<u64> for Opcode {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The tag a function is looked up by before its [Opcode] is resolved (overloads,
/// versions). Deliberately not convertible into an [Opcode].
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionTag(pub u64);

impl std::fmt::Display for FunctionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tag#{}", self.0)
    }
}
