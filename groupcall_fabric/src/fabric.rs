// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The fabric context: the handle buffers are registered through.
//!
//! A [FabricContext] is normally created once at startup and passed to everything
//! which registers memory. Code that can't have it threaded through may use the
//! process-wide one instead, which has to be set with [init_global] before first
//! use and can only be set once.

use std::ops::BitOr;
use std::sync::Arc;

use groupcall::concurrency::{self, Duration};
use once_cell::sync::OnceCell;

use crate::FabricErr;

/// Access rights a buffer is registered with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessFlags(u64);

impl AccessFlags {
    /// Local sends from the buffer
    pub const SEND: Self = Self(1 << 0);
    /// Local receives into the buffer
    pub const RECV: Self = Self(1 << 1);
    /// Local one-sided reads into the buffer
    pub const READ: Self = Self(1 << 2);
    /// Local one-sided writes from the buffer
    pub const WRITE: Self = Self(1 << 3);
    /// Peers may read the buffer
    pub const REMOTE_READ: Self = Self(1 << 4);
    /// Peers may write the buffer
    pub const REMOTE_WRITE: Self = Self(1 << 5);
    /// Combined local and remote read/write access
    pub const ALL: Self = Self(0b11_1111);

    /// The raw bit set
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Returns [true] if every flag in `other` is set in `self`
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A buffer registration. Dropping it deregisters the buffer.
pub trait RegisteredMemory: Send + Sync {
    /// The authorization key peers must present to target this buffer, [None] if the
    /// fabric can't provide one
    fn key(&self) -> Option<u64>;
}

/// The network fabric's registration primitive
pub trait FabricDomain: Send + Sync {
    /// Register `len` bytes starting at `addr`
    ///
    /// Returns [FabricErr::TryAgain] when the fabric is temporarily out of
    /// resources
    fn register(
        &self,
        addr: u64,
        len: usize,
        access: AccessFlags,
    ) -> Result<Box<dyn RegisteredMemory>, FabricErr>;
}

/// What happens once a fatal fabric error has been logged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalAction {
    /// Terminate the process
    Abort,
    /// Unwind the current thread instead. Only meant for exercising failure paths
    /// in tests, a node surviving it is left with a half set up fabric.
    Panic,
}

impl Default for FatalAction {
    fn default() -> Self {
        Self::Abort
    }
}

/// Tunables of a [FabricContext]
#[derive(Clone, Debug)]
pub struct FabricConfig {
    /// How many times a registration reporting [FabricErr::TryAgain] is retried
    pub registration_retries: usize,
    /// Pause between registration attempts. The registering task yields for it.
    pub retry_backoff: Duration,
    /// Response to registration, key or key exchange failures during setup
    pub on_fatal: FatalAction,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            registration_retries: 16,
            retry_backoff: Duration::from_micros(100),
            on_fatal: FatalAction::Abort,
        }
    }
}

/// Handle to the fabric domain that buffers are registered with
#[derive(Clone)]
pub struct FabricContext {
    domain: Arc<dyn FabricDomain>,
    config: FabricConfig,
}

impl FabricContext {
    /// Create a context over `domain` with the default [FabricConfig]
    pub fn new(domain: Arc<dyn FabricDomain>) -> Self {
        Self::with_config(domain, FabricConfig::default())
    }

    /// Create a context over `domain`
    pub fn with_config(domain: Arc<dyn FabricDomain>, config: FabricConfig) -> Self {
        Self { domain, config }
    }

    /// This context's configuration
    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    /// Log `what` and terminate as [FabricConfig::on_fatal] says
    pub(crate) fn fatal(&self, what: &str) -> ! {
        crate::fatal(self.config.on_fatal, what)
    }

    /// Register `buf` with the fabric, retrying while the fabric reports
    /// [FabricErr::TryAgain] up to [FabricConfig::registration_retries] times
    pub async fn register(
        &self,
        buf: &[u8],
        access: AccessFlags,
    ) -> Result<Box<dyn RegisteredMemory>, FabricErr> {
        let addr = buf.as_ptr() as u64;
        let mut attempts = 0usize;
        loop {
            match self.domain.register(addr, buf.len(), access) {
                Err(FabricErr::TryAgain) if attempts < self.config.registration_retries => {
                    attempts += 1;
                    log::debug!("Registration of {addr:#x} busy, retry {attempts}");
                    if !self.config.retry_backoff.is_zero() {
                        concurrency::sleep(self.config.retry_backoff).await;
                    }
                }
                other => return other,
            }
        }
    }
}

static GLOBAL_FABRIC: OnceCell<FabricContext> = OnceCell::new();

/// Set the process-wide [FabricContext]. Fails with [FabricErr::AlreadyInitialized]
/// if it was already set.
pub fn init_global(ctx: FabricContext) -> Result<(), FabricErr> {
    GLOBAL_FABRIC
        .set(ctx)
        .map_err(|_| FabricErr::AlreadyInitialized)
}

/// The process-wide [FabricContext], [None] until [init_global] ran
pub fn global() -> Option<&'static FabricContext> {
    GLOBAL_FABRIC.get()
}
