// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Fabric error types

use std::fmt::Display;

use groupcall::ConnectionErr;

/// Errors raised by fabric collaborators
#[derive(Debug)]
pub enum FabricErr {
    /// The fabric is temporarily out of resources, the operation can be retried
    TryAgain,
    /// The fabric refused to register a buffer
    Registration(String),
    /// The global [crate::FabricContext] was already initialized
    AlreadyInitialized,
    /// The connection to a peer can't be used
    Connection(ConnectionErr),
    /// The side channel failed
    Io(std::io::Error),
    /// A key exchange record of the wrong length was received
    MalformedRecord(usize),
}

impl std::error::Error for FabricErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(inner) => Some(inner),
            Self::Io(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for FabricErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TryAgain => write!(f, "Fabric resources temporarily unavailable"),
            Self::Registration(reason) => write!(f, "Buffer registration failed '{reason}'"),
            Self::AlreadyInitialized => {
                write!(f, "The global fabric context is already initialized")
            }
            Self::Connection(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "Side channel failure '{err}'"),
            Self::MalformedRecord(len) => {
                write!(f, "Received a key exchange record of {len} bytes")
            }
        }
    }
}

impl From<ConnectionErr> for FabricErr {
    fn from(value: ConnectionErr) -> Self {
        Self::Connection(value)
    }
}

impl From<std::io::Error> for FabricErr {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
