// SPDX-License-Identifier: BSD-3-Clause

//! A stale SSR row for a dead pid must not wedge the supervisor; it should
//! be reconciled away and a fresh child spawned.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use cidr::Ipv4Cidr;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::Pid;

use sender_registry::SharedSenderRegistry;
use umm::entry::SenderEntry;
use umm::spawn::ensure_child_running;
use umm_core::feed::named;

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn fresh_ssr() -> SharedSenderRegistry {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!("/ummSpawnTest{}_{n}", std::process::id());
    SharedSenderRegistry::init_named(&name).unwrap()
}

fn test_entry() -> SenderEntry {
    SenderEntry {
        feed: named::HDS,
        mcast_group: "224.0.1.50:38800".parse().unwrap(),
        fmtp_server: "0.0.0.0:0".parse().unwrap(),
        ttl: 64,
        subnet: "10.20.1.0/28".parse::<Ipv4Cidr>().unwrap(),
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
fn stale_ssr_row_is_reconciled_and_a_fresh_child_spawned() {
    let ssr = fresh_ssr();
    let entry = test_entry();

    // A pid essentially guaranteed to be dead on any normal test host.
    let stale_pid = 2_000_000_000;
    ssr.put(entry.feed, stale_pid, 11111, 22222).unwrap();

    let sender_bin = PathBuf::from(env!("CARGO_BIN_EXE_sender_child_harness"));
    let (pid, fmtp_port, rpc_port) = ensure_child_running(&entry, &ssr, &sender_bin).unwrap();

    assert_ne!(pid, stale_pid);
    assert_ne!(fmtp_port, 0);
    assert_ne!(rpc_port, 0);

    let (got_pid, ..) = ssr.get(entry.feed).unwrap();
    assert_eq!(got_pid, pid);

    let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
    let _ = waitpid(Pid::from_raw(pid), None);
    ssr.destroy(true).unwrap();
}
