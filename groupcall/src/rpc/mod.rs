// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Reply tracking for a call fanned out to a group of nodes
//!
//! A call is represented by two halves which are created together
//!
//! * [PendingResults] is the promise side. It lives with the code which sends the
//!   call and delivers replies. Once the destination set is known it calls
//!   [PendingResults::fulfill_map], then resolves each node with
//!   [PendingResults::set_value] or [PendingResults::set_exception] as replies
//!   come off the network.
//! * [QueryResults] is the future side, handed back to the application. It resolves
//!   in two stages: first the destination set becomes known, then each node's
//!   outcome arrives in its own slot (a [ReplyFuture]).
//!
//! Membership changes reach every in-flight call through [PendingBase], which
//! doesn't carry the reply type, and the [PendingRegistry] which stores calls as
//! trait objects.
//!
//! Calls with no return value use [PendingCast] / [CastResults] which only track the
//! destination set.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use groupcall::concurrency::Duration;
//! use groupcall::rpc::{PendingRegistry, PendingResults};
//! use groupcall::RpcErr;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = PendingRegistry::new();
//!     let pending = Arc::new(PendingResults::<String>::new());
//!     let mut results = pending.get_future();
//!
//!     registry.fulfill(&pending, &[5, 6]);
//!
//!     pending.set_exception(5, RpcErr::remote(5, "no such key"));
//!     // node 6 left the group before answering
//!     registry.notify_node_removed(6);
//!
//!     let map = results
//!         .wait(Duration::from_millis(10))
//!         .await
//!         .expect("Call was abandoned")
//!         .expect("Destinations are known");
//!     assert!(map.get(5).await.unwrap_err().is_remote_exception());
//!     assert!(map.get(6).await.unwrap_err().is_node_removed());
//! }
//! ```

pub mod pending;
pub mod query;
pub mod registry;

pub use pending::{PendingBase, PendingCast, PendingResults};
pub use query::{CastResults, QueryResults, ReplyFuture, ReplyMap, DEFAULT_MAP_RETRY_INTERVAL};
pub use registry::{CallId, PendingRegistry};
