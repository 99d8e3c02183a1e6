// SPDX-License-Identifier: BSD-3-Clause

//! A minimal stand-in for the real sender binary: parses the same flags,
//! starts a real `client_rpc` server fronting a real
//! `subnet_pool`/`authorizer` pair, posts the `"<fmtp_port> <rpc_port>\n"`
//! handshake line on stdout, and blocks until `SIGTERM`. It does not
//! implement FMTP multicast; that stays out of scope.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use log::info;

use cidr::Ipv4Cidr;
use client_rpc::RpcServer;
use subnet_pool::{Authorizer, SubnetPool};
use umm_core::FeedSet;

/// Harness implementing the external sender-child contract.
#[derive(Parser, Debug)]
struct Args {
    /// Log destination; accepted for contract fidelity, unused by the harness.
    #[arg(short = 'l')]
    log_dest: Option<String>,

    /// Verbose logging.
    #[arg(short = 'v', conflicts_with = "debug")]
    verbose: bool,

    /// Debug logging.
    #[arg(short = 'x')]
    debug: bool,

    /// Feed bitset, as a raw decimal value: the core treats feeds purely
    /// as named bit positions and never interprets their meaning.
    #[arg(short = 'f')]
    feed: u32,

    /// FMTP subnet prefix length.
    #[arg(short = 'n')]
    subnet_prefix_len: u8,

    /// FMTP subnet network address; a harness-only addition. The real
    /// sender's arg list omits the network address itself, which a real
    /// implementation would recover from its own configuration instead of
    /// the command line.
    #[arg(short = 'b', long = "subnet")]
    subnet_network: String,

    /// Retransmission timeout in minutes.
    #[arg(short = 'r')]
    retx_timeout_min: Option<u32>,

    /// Product queue pathname.
    #[arg(short = 'q')]
    product_queue: PathBuf,

    /// FMTP server host:port.
    #[arg(short = 's')]
    fmtp_server: SocketAddr,

    /// Multicast TTL.
    #[arg(short = 't')]
    ttl: u8,

    /// `<mcast_group_host>:<mcast_group_port>`.
    mcast_group: SocketAddr,
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let prefix_cidr: Ipv4Cidr = format!("{}/{}", args.subnet_network, args.subnet_prefix_len).parse()?;
    let pool = Arc::new(SubnetPool::new(prefix_cidr)?);
    let authorizer = Arc::new(Authorizer::new());
    let feed = FeedSet::from_raw(args.feed);

    let server = Arc::new(RpcServer::bind(pool, authorizer, feed)?);

    unsafe {
        let action = nix::sys::signal::SigAction::new(
            nix::sys::signal::SigHandler::Handler(on_sigterm),
            nix::sys::signal::SaFlags::empty(),
            nix::sys::signal::SigSet::empty(),
        );
        nix::sys::signal::sigaction(nix::sys::signal::Signal::SIGTERM, &action)?;
    }

    let run_server = Arc::clone(&server);
    let accept_thread = std::thread::spawn(move || run_server.run());

    let fmtp_port = if args.fmtp_server.port() != 0 {
        args.fmtp_server.port()
    } else {
        // No real FMTP listener in the harness; report a synthesized,
        // stable non-zero placeholder so the handshake line still parses.
        1
    };
    let rpc_port = server.local_addr().port();

    info!(
        "sender_child_harness: feed={feed} mcast_group={} ttl={} retx={:?}",
        args.mcast_group, args.ttl, args.retx_timeout_min
    );

    println!("{fmtp_port} {rpc_port}");
    std::io::stdout().flush()?;

    while !STOP.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    server.stop()?;
    let _ = accept_thread.join();
    Ok(())
}
