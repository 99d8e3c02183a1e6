// SPDX-License-Identifier: BSD-3-Clause

//! End-to-end subscribe/unsubscribe scenarios exercised against the real
//! `sender_child_harness` binary instead of a mock sender.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cidr::Ipv4Cidr;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use sender_registry::SharedSenderRegistry;
use umm::entry::SenderEntry;
use umm::UpstreamManager;
use umm_core::feed::named;

/// Test harness children block until `SIGTERM`; reap any spawned for
/// `feed` before the manager (and its SSR) is torn down, so a test run
/// does not leak processes.
fn reap_child(manager: &UpstreamManager, feed: umm_core::FeedSet) {
    if let Some(pid) = manager.entry_pid(feed) {
        let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        let _ = waitpid(Pid::from_raw(pid), None);
    }
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn sender_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_sender_child_harness"))
}

fn fresh_ssr() -> SharedSenderRegistry {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!("/ummSupervisorTest{}_{n}", std::process::id());
    SharedSenderRegistry::init_named(&name).unwrap()
}

fn test_entry(feed: umm_core::FeedSet, subnet: &str, port_seed: u16) -> SenderEntry {
    SenderEntry {
        feed,
        mcast_group: format!("224.0.1.{}:{}", port_seed % 250 + 1, 38800 + port_seed)
            .parse()
            .unwrap(),
        fmtp_server: "0.0.0.0:0".parse().unwrap(),
        ttl: 64,
        subnet: subnet.parse::<Ipv4Cidr>().unwrap(),
        vc_endpoint: None,
        product_queue_path: PathBuf::from("/tmp/umm-test-queue"),
        retx_timeout_min: None,
        pid: 0,
        fmtp_port: 0,
        rpc_port: 0,
        circuit_id: None,
    }
}

#[test]
fn subscribe_spawns_child_and_allows_the_client() {
    let ssr = fresh_ssr();
    let manager = UpstreamManager::new(ssr, sender_bin(), None);
    manager
        .add_sender(test_entry(named::IDS, "10.10.1.0/24", 1))
        .unwrap();

    let client_addr = Ipv4Addr::new(192, 168, 9, 9);
    let (addr, prefix) = manager.subscribe(named::IDS, client_addr, None).unwrap();
    assert_eq!(addr, client_addr);
    assert_eq!(prefix, 32);

    manager.unsubscribe(named::IDS, client_addr).unwrap();
    reap_child(&manager, named::IDS);
    manager.umm_destroy(true).unwrap();
}

#[test]
fn subscribe_on_unknown_feed_is_noent() {
    let ssr = fresh_ssr();
    let manager = UpstreamManager::new(ssr, sender_bin(), None);
    manager
        .add_sender(test_entry(named::IDS, "10.10.2.0/24", 2))
        .unwrap();

    let err = manager
        .subscribe(named::PPS, Ipv4Addr::new(1, 2, 3, 4), None)
        .unwrap_err();
    assert_eq!(err.kind(), umm_core::ErrorKind::NoEnt);

    manager.umm_destroy(true).unwrap();
}

#[test]
fn adding_a_conflicting_entry_is_duplicate() {
    let ssr = fresh_ssr();
    let manager = UpstreamManager::new(ssr, sender_bin(), None);
    manager
        .add_sender(test_entry(named::IDS, "10.10.3.0/24", 3))
        .unwrap();

    let err = manager
        .add_sender(test_entry(named::IDS, "10.10.4.0/24", 4))
        .unwrap_err();
    assert_eq!(err.kind(), umm_core::ErrorKind::Duplicate);

    manager.umm_destroy(true).unwrap();
}

#[test]
fn two_concurrent_subscribes_share_one_spawn() {
    let ssr = fresh_ssr();
    let manager = Arc::new(UpstreamManager::new(ssr, sender_bin(), None));
    manager
        .add_sender(test_entry(named::DDPLUS, "10.10.5.0/28", 5))
        .unwrap();

    let m1 = Arc::clone(&manager);
    let m2 = Arc::clone(&manager);
    let t1 = thread::spawn(move || m1.subscribe(named::DDPLUS, Ipv4Addr::new(10, 0, 0, 1), None));
    let t2 = thread::spawn(move || m2.subscribe(named::DDPLUS, Ipv4Addr::new(10, 0, 0, 2), None));

    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();
    assert!(r1.is_ok());
    assert!(r2.is_ok());

    // Exactly one fork/exec happened: both subscribers ended up pinned to
    // the same child pid.
    assert!(manager.entry_pid(named::DDPLUS).is_some());
    reap_child(&manager, named::DDPLUS);

    thread::sleep(Duration::from_millis(50));

    Arc::try_unwrap(manager)
        .unwrap_or_else(|_| panic!("manager still shared"))
        .umm_destroy(true)
        .unwrap();
}
