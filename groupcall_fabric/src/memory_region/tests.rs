// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

use std::sync::Arc;

use super::*;
use crate::fabric::FabricConfig;
use crate::test_support::panicking_config;
use crate::test_support::{StubConnection, StubDomain, StubExchange, WriteRecord};
use crate::FabricErr;

const PEER: NodeId = 7;
const PEER_KEY: u64 = 0xab;
const PEER_ADDR: u64 = 0x10_0000;

struct Fixture {
    domain: Arc<StubDomain>,
    ctx: FabricContext,
    connections: ConnectionManager,
    connection: Arc<StubConnection>,
    exchange: StubExchange,
}

fn fixture() -> Fixture {
    let domain = Arc::new(StubDomain::new());
    let ctx = FabricContext::with_config(domain.clone(), panicking_config());
    let connections = ConnectionManager::new();
    let connection = Arc::new(StubConnection::new());
    connections.add(PEER, connection.clone());
    Fixture {
        domain,
        ctx,
        connections,
        connection,
        exchange: StubExchange::new(MrConnectionData {
            mr_key: PEER_KEY,
            vaddr: PEER_ADDR,
        }),
    }
}

fn buffers(size: usize) -> (Box<[u8]>, Box<[u8]>) {
    (
        vec![0u8; size].into_boxed_slice(),
        vec![0u8; size].into_boxed_slice(),
    )
}

async fn region(f: &Fixture, size: usize) -> Result<MemoryRegion, ConnectionErr> {
    let (send, recv) = buffers(size);
    MemoryRegion::new(&f.ctx, &f.connections, &f.exchange, PEER, send, recv).await
}

#[crate::test_support::test]
async fn test_setup_swaps_keys_with_peer() {
    let f = fixture();
    let region = region(&f, 1024).await.expect("Region setup failed");

    assert_eq!(PEER, region.remote_id());
    assert_eq!(1024, region.size());
    assert_eq!(PEER_KEY, region.remote_key());
    assert_eq!(PEER_ADDR, region.remote_addr());
    assert_ne!(region.local_read_key(), region.local_write_key());
    assert!(region.is_connected());

    let registrations = f.domain.registrations();
    assert_eq!(2, registrations.len());
    assert_eq!(
        (region.send_buf().as_ptr() as u64, 1024, AccessFlags::ALL),
        registrations[0]
    );
    assert_eq!(
        (region.recv_buf().as_ptr() as u64, 1024, AccessFlags::ALL),
        registrations[1]
    );

    // the peer is told about our receive buffer, in network byte order
    let sent = f.exchange.sent();
    assert_eq!(1, sent.len());
    assert_eq!(PEER, sent[0].0);
    let mut expected = region.local_read_key().to_be_bytes().to_vec();
    expected.extend_from_slice(&(region.recv_buf().as_ptr() as u64).to_be_bytes());
    assert_eq!(expected, sent[0].1);
}

#[crate::test_support::test]
async fn test_write_lands_at_matching_offset() {
    let f = fixture();
    let mut region = region(&f, 1024).await.expect("Region setup failed");
    region.send_buf_mut()[1000..1024].copy_from_slice(&[0x5a; 24]);

    assert_eq!(Ok(true), region.write_remote(1000, 24, true));
    assert_eq!(Ok(true), region.write_remote(0, 0, false));

    let writes = f.connection.writes();
    assert_eq!(
        WriteRecord {
            local_addr: region.send_buf().as_ptr() as u64 + 1000,
            remote_addr: PEER_ADDR + 1000,
            size: 24,
            with_completion: true,
            remote_key: PEER_KEY,
            local_key: region.local_read_key(),
        },
        writes[0]
    );
    assert_eq!(PEER_ADDR, writes[1].remote_addr);
    assert!(!writes[1].with_completion);
}

#[crate::test_support::test]
#[should_panic(expected = "exceeds the 1024 byte region")]
async fn test_write_past_end_panics() {
    let f = fixture();
    let region = region(&f, 1024).await.expect("Region setup failed");
    let _ = region.write_remote(1000, 25, false);
}

#[crate::test_support::test]
#[should_panic(expected = "exceeds the 16 byte region")]
async fn test_write_with_overflowing_range_panics() {
    let f = fixture();
    let region = region(&f, 16).await.expect("Region setup failed");
    let _ = region.write_remote(usize::MAX, 2, false);
}

#[crate::test_support::test]
async fn test_setup_without_connection() {
    let f = fixture();
    f.connections.remove(PEER);

    let err = region(&f, 64).await.unwrap_err();
    assert_eq!(ConnectionErr::Removed(PEER), err);
    assert!(f.domain.registrations().is_empty());
}

#[crate::test_support::test]
async fn test_setup_on_broken_connection() {
    let f = fixture();
    f.connection.set_broken(true);

    let err = region(&f, 64).await.unwrap_err();
    assert_eq!(ConnectionErr::Broken(PEER), err);
    assert!(f.exchange.sent().is_empty());
}

#[crate::test_support::test]
async fn test_connection_removed_after_setup() {
    let f = fixture();
    let region = region(&f, 64).await.expect("Region setup failed");
    assert_eq!(Ok(true), region.sync());

    f.connections.remove(PEER);
    drop(f.connection);

    assert!(!region.is_connected());
    assert_eq!(
        Err(ConnectionErr::Removed(PEER)),
        region.write_remote(0, 8, false)
    );
    assert_eq!(Err(ConnectionErr::Removed(PEER)), region.sync());
}

#[crate::test_support::test]
async fn test_sync_goes_over_the_connection() {
    let f = fixture();
    let region = region(&f, 64).await.expect("Region setup failed");
    assert_eq!(Ok(true), region.sync());
    assert_eq!(Ok(true), region.sync());
    assert_eq!(2, f.connection.sync_count());
}

#[crate::test_support::test]
async fn test_busy_fabric_is_retried() {
    let f = fixture();
    f.domain.busy_for(3);
    let region = region(&f, 64).await.expect("Region setup failed");
    assert_eq!(2, f.domain.registrations().len());
    assert_eq!(PEER_KEY, region.remote_key());
}

#[crate::test_support::test]
#[should_panic(expected = "register memory buffer for write")]
async fn test_persistently_busy_fabric_is_fatal() {
    let domain = Arc::new(StubDomain::new());
    domain.busy_for(10);
    let f = Fixture {
        ctx: FabricContext::with_config(
            domain.clone(),
            FabricConfig {
                registration_retries: 2,
                retry_backoff: std::time::Duration::ZERO,
                on_fatal: FatalAction::Panic,
            },
        ),
        domain,
        ..fixture()
    };
    let _ = region(&f, 64).await;
}

#[crate::test_support::test]
#[should_panic(expected = "Fatal fabric error")]
async fn test_refused_registration_is_fatal() {
    let f = fixture();
    f.domain.refuse();
    let _ = region(&f, 64).await;
}

#[crate::test_support::test]
#[should_panic(expected = "fail to get write memory key")]
async fn test_missing_key_is_fatal() {
    let f = fixture();
    f.domain.withhold_keys();
    let _ = region(&f, 64).await;
}

#[crate::test_support::test]
#[should_panic(expected = "exchange connection management info with node 7")]
async fn test_failed_exchange_is_fatal() {
    let f = Fixture {
        exchange: StubExchange::failing(),
        ..fixture()
    };
    let _ = region(&f, 64).await;
}

#[crate::test_support::test]
#[should_panic(expected = "must be the same size")]
async fn test_mismatched_buffers_panic() {
    let f = fixture();
    let _ = MemoryRegion::new(
        &f.ctx,
        &f.connections,
        &f.exchange,
        PEER,
        vec![0u8; 64].into_boxed_slice(),
        vec![0u8; 32].into_boxed_slice(),
    )
    .await;
}

#[crate::test_support::test]
async fn test_write_offset_wraps_peer_address() {
    let f = Fixture {
        exchange: StubExchange::new(MrConnectionData {
            mr_key: PEER_KEY,
            vaddr: u64::MAX - 15,
        }),
        ..fixture()
    };
    let region = region(&f, 64).await.expect("Region setup failed");
    assert_eq!(Ok(true), region.write_remote(32, 8, false));
    assert_eq!(16, f.connection.writes()[0].remote_addr);
}

const ABORT_CHILD_ENV: &str = "GROUPCALL_FABRIC_ABORT_CHILD";

#[test]
fn test_fatal_error_terminates_process() {
    if std::env::var_os(ABORT_CHILD_ENV).is_some() {
        // re-executed below: fail setup inside a spawned task with the default config
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let domain = Arc::new(StubDomain::new());
            domain.refuse();
            let ctx = FabricContext::new(domain);
            let connections = ConnectionManager::new();
            connections.add(PEER, Arc::new(StubConnection::new()));
            let exchange = StubExchange::new(MrConnectionData {
                mr_key: PEER_KEY,
                vaddr: PEER_ADDR,
            });
            let setup = tokio::spawn(async move {
                let (send, recv) = buffers(64);
                MemoryRegion::new(&ctx, &connections, &exchange, PEER, send, recv)
                    .await
                    .map(|_| ())
            });
            let _ = setup.await;
        });
        // surviving the failure shows up as a clean exit
        std::process::exit(0);
    }

    let status = std::process::Command::new(std::env::current_exe().unwrap())
        .args([
            "memory_region::tests::test_fatal_error_terminates_process",
            "--exact",
            "--test-threads=1",
        ])
        .env(ABORT_CHILD_ENV, "1")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(!status.success());
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGABRT
        assert_eq!(Some(6), status.signal());
    }
}

#[test]
fn test_access_flags() {
    let local = AccessFlags::SEND | AccessFlags::RECV | AccessFlags::READ | AccessFlags::WRITE;
    let remote = AccessFlags::REMOTE_READ | AccessFlags::REMOTE_WRITE;
    assert_eq!(AccessFlags::ALL, local | remote);
    assert!(AccessFlags::ALL.contains(AccessFlags::REMOTE_WRITE));
    assert!(!local.contains(AccessFlags::REMOTE_WRITE));
}

// the only test touching the process-wide context
#[crate::test_support::test]
async fn test_global_fabric_context() {
    let f = fixture();
    fabric::init_global(f.ctx.clone()).expect("Global context already set");
    assert!(matches!(
        fabric::init_global(f.ctx.clone()),
        Err(FabricErr::AlreadyInitialized)
    ));
    assert!(fabric::global().is_some());

    let (send, recv) = buffers(32);
    let region =
        MemoryRegion::with_global_fabric(&f.connections, &f.exchange, PEER, send, recv)
            .await
            .expect("Region setup failed");
    assert_eq!(PEER_KEY, region.remote_key());
    assert_eq!(2, f.domain.registrations().len());
}
