// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Error types for group calls and the connections they ride on

use std::fmt::Display;

use crate::NodeId;

/// The opaque condition a remote call handler raised. It's carried to the caller as-is.
pub type RemoteCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The failure stored in a single destination's outcome slot.
///
/// These are only surfaced when that specific node's outcome is read; a failure
/// for one node never affects its siblings in the same call.
#[derive(Debug)]
pub enum RpcErr {
    /// The destination's handler raised a condition while processing the call
    RemoteException {
        /// The node which replied with the exception
        who: NodeId,
        /// The captured condition, if the remote side shipped one
        cause: Option<RemoteCause>,
    },
    /// The destination was evicted from the group before it replied
    NodeRemovedFromGroup(NodeId),
    /// The promise side released this node's slot without ever resolving it
    ReplyDropped(NodeId),
    /// The promise side was dropped before the destination set became known
    CallAbandoned,
}

impl RpcErr {
    /// Build a [RpcErr::RemoteException] from anything that can be boxed into an error
    pub fn remote<E>(who: NodeId, cause: E) -> Self
    where
        E: Into<RemoteCause>,
    {
        Self::RemoteException {
            who,
            cause: Some(cause.into()),
        }
    }

    /// The node this failure is tagged with, if any
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::RemoteException { who, .. } => Some(*who),
            Self::NodeRemovedFromGroup(who) => Some(*who),
            Self::ReplyDropped(who) => Some(*who),
            Self::CallAbandoned => None,
        }
    }

    /// Determine if this is a [RpcErr::RemoteException]
    pub fn is_remote_exception(&self) -> bool {
        matches!(self, Self::RemoteException { .. })
    }

    /// Determine if this is a [RpcErr::NodeRemovedFromGroup]
    pub fn is_node_removed(&self) -> bool {
        matches!(self, Self::NodeRemovedFromGroup(_))
    }
}

impl std::error::Error for RpcErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RemoteException {
                cause: Some(inner), ..
            } => Some(inner.as_ref()),
            _ => None,
        }
    }
}

impl Display for RpcErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteException { who, cause: None } => {
                write!(f, "An exception occurred at node with id {who}")
            }
            Self::RemoteException {
                who,
                cause: Some(cause),
            } => {
                if f.alternate() {
                    write!(f, "An exception occurred at node with id {who} '{cause:#}'")
                } else {
                    write!(f, "An exception occurred at node with id {who} '{cause}'")
                }
            }
            Self::NodeRemovedFromGroup(who) => {
                write!(f, "Node with id {who} has been removed from the group")
            }
            Self::ReplyDropped(who) => {
                write!(f, "The reply slot for node {who} was dropped without an outcome")
            }
            Self::CallAbandoned => {
                write!(f, "The call was abandoned before its destinations were known")
            }
        }
    }
}

/// A transport session to a peer can't be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErr {
    /// The session to the node no longer exists
    Removed(NodeId),
    /// The session to the node exists but is flagged unusable
    Broken(NodeId),
}

impl ConnectionErr {
    /// The peer this error refers to
    pub fn node(&self) -> NodeId {
        match self {
            Self::Removed(who) | Self::Broken(who) => *who,
        }
    }
}

impl std::error::Error for ConnectionErr {}

impl Display for ConnectionErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removed(who) => write!(f, "RDMA Connection to {who} has been removed"),
            Self::Broken(who) => write!(f, "RDMA Connection to {who} is broken"),
        }
    }
}
