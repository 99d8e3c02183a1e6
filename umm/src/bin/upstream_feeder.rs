// SPDX-License-Identifier: BSD-3-Clause

//! `upstream-feeder`: loads a configuration file, builds an
//! [`UpstreamManager`], and drives it from a trivial stdin command loop
//! standing in for the real upstream LDM server process. This is
//! scaffolding to exercise the façade end-to-end, not a reimplementation
//! of the upstream protocol.

use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use sender_registry::SharedSenderRegistry;
use umm::{config, Reaper, UpstreamManager};
use umm_core::FeedSet;

#[derive(Parser, Debug)]
#[command(name = "upstream-feeder")]
struct Args {
    /// Path to the line-oriented sender configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Path to the sender binary invoked on first subscribe per feed.
    #[arg(long)]
    sender_bin: PathBuf,

    /// Path to the virtual-circuit provisioner command; required only if
    /// any configured sender is VLAN-backed.
    #[arg(long)]
    vc_command: Option<PathBuf>,

    /// `RUST_LOG`-style filter directive; defaults to env_logger's own
    /// `RUST_LOG` handling if unset.
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(level) = &args.log_level {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    } else {
        env_logger::init();
    }

    let config_text = std::fs::read_to_string(&args.config)?;
    let entries = config::parse_str(&config_text)?;

    let ssr = SharedSenderRegistry::init()?;
    let manager = Arc::new(UpstreamManager::new(ssr, args.sender_bin.clone(), args.vc_command.clone()));
    for entry in entries {
        manager.add_sender(entry)?;
    }

    // The reaper thread is the only code path that calls `terminated()`
    // outside of tests: without it a dead child's SSR row is only
    // reconciled lazily, on the next `subscribe` for that feed.
    let reaper = Arc::new(Reaper::install()?);
    let reaper_thread = {
        let reaper = Arc::clone(&reaper);
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || reaper.run(&manager))
    };

    info!("upstream-feeder ready, reading commands from stdin");
    run_command_loop(&manager)?;

    reaper.stop();
    let _ = reaper_thread.join();

    Arc::try_unwrap(manager)
        .unwrap_or_else(|_| panic!("upstream manager still shared at shutdown"))
        .umm_destroy(true)?;
    Ok(())
}

fn run_command_loop(manager: &UpstreamManager) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            ["quit"] => break,
            ["subscribe", feed_name, addr] => {
                handle_subscribe(manager, feed_name, addr);
            }
            ["unsubscribe", feed_name, addr] => {
                handle_unsubscribe(manager, feed_name, addr);
            }
            [] => continue,
            _ => writeln!(stdout, "unrecognized command: {line}")?,
        }
    }
    Ok(())
}

fn handle_subscribe(manager: &UpstreamManager, feed_name: &str, addr: &str) {
    let feed = match FeedSet::from_name(feed_name) {
        Ok(f) => f,
        Err(e) => {
            error!("subscribe: {e}");
            return;
        }
    };
    let client_addr: Ipv4Addr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!("subscribe: bad address '{addr}': {e}");
            return;
        }
    };
    match manager.subscribe(feed, client_addr, None) {
        Ok((cidr_addr, prefix_len)) => println!("{cidr_addr}/{prefix_len}"),
        Err(e) => error!("subscribe failed: {e}"),
    }
}

fn handle_unsubscribe(manager: &UpstreamManager, feed_name: &str, addr: &str) {
    let feed = match FeedSet::from_name(feed_name) {
        Ok(f) => f,
        Err(e) => {
            error!("unsubscribe: {e}");
            return;
        }
    };
    let client_addr: Ipv4Addr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            error!("unsubscribe: bad address '{addr}': {e}");
            return;
        }
    };
    match manager.unsubscribe(feed, client_addr) {
        Ok(()) => println!("ok"),
        Err(e) => error!("unsubscribe failed: {e}"),
    }
}
