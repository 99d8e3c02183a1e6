// SPDX-License-Identifier: BSD-3-Clause

//! The ensure-child-running algorithm: reconcile the SSR against reality,
//! and fork/exec a fresh sender child if none is alive.

use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

use cidr::Inet;
use log::warn;
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};

use sender_registry::SharedSenderRegistry;
use umm_core::Error;

use crate::entry::SenderEntry;

/// Runs with the SSR locked exclusively for its entire body, so that
/// concurrent callers racing on the same feed observe at most one
/// `fork`/`exec`.
pub fn ensure_child_running(
    entry: &SenderEntry,
    ssr: &SharedSenderRegistry,
    sender_bin: &Path,
) -> Result<(i32, u16, u16), Error> {
    let guard = ssr.lock()?;

    match guard.get(entry.feed) {
        Ok((pid, fmtp_port, rpc_port)) => {
            match signal::kill(Pid::from_raw(pid), None) {
                Ok(()) => return Ok((pid, fmtp_port, rpc_port)),
                Err(nix::errno::Errno::ESRCH) => {
                    warn!("sender pid {pid} for feed {} is gone; reconciling SSR", entry.feed);
                    guard.remove(pid)?;
                }
                Err(e) => return Err(Error::system_io("kill(pid, 0)", io::Error::from_raw_os_error(e as i32))),
            }
        }
        Err(e) if e.kind() == umm_core::ErrorKind::NoEnt => {}
        Err(e) => return Err(e),
    }

    let (read_end, write_end) =
        unistd::pipe().map_err(|e| Error::system(format!("pipe: {e}")))?;

    let args = build_args(entry);

    // Block the termination signals in this thread for the duration of the
    // fork: the child unblocks them explicitly on entry, and we do not want
    // a signal delivered to this thread to race with the fork itself.
    let mut blocked = SigSet::empty();
    blocked.add(Signal::SIGTERM);
    blocked.add(Signal::SIGINT);
    let mut saved = SigSet::empty();
    signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&blocked), Some(&mut saved))
        .map_err(|e| Error::system(format!("pthread_sigmask: {e}")))?;

    let fork_result = unsafe { unistd::fork() };
    let restore = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&saved), None);

    match fork_result {
        Ok(ForkResult::Child) => {
            // Only async-signal-safe-ish setup here; any failure exits the
            // child immediately rather than unwinding into the parent's
            // address space.
            let _ = unistd::close(read_end.as_raw_fd());
            let mut unblock = SigSet::empty();
            unblock.add(Signal::SIGTERM);
            unblock.add(Signal::SIGINT);
            let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&unblock), None);
            if unistd::dup2(write_end.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
                unsafe { libc::_exit(1) };
            }
            drop(write_end);

            let c_bin = std::ffi::CString::new(sender_bin.to_string_lossy().as_bytes())
                .unwrap_or_else(|_| std::ffi::CString::new("sender").unwrap());
            let mut c_args: Vec<std::ffi::CString> = vec![c_bin.clone()];
            c_args.extend(args.iter().map(|a| std::ffi::CString::new(a.as_bytes()).unwrap()));
            let _ = unistd::execvp(&c_bin, &c_args);
            // execvp only returns on failure.
            unsafe { libc::_exit(1) };
        }
        Ok(ForkResult::Parent { child }) => {
            restore.map_err(|e| Error::system(format!("pthread_sigmask restore: {e}")))?;
            drop(write_end);
            let pid = child;

            let handshake = read_handshake(&read_end);
            drop(read_end);

            let (fmtp_port, rpc_port) = match handshake {
                Ok(ports) => ports,
                Err(e) => {
                    kill_and_reap(pid);
                    return Err(e);
                }
            };

            if let Err(e) = guard.put(entry.feed, pid.as_raw(), fmtp_port, rpc_port) {
                kill_and_reap(pid);
                return Err(e);
            }

            Ok((pid.as_raw(), fmtp_port, rpc_port))
        }
        Err(e) => {
            let _ = restore;
            Err(Error::system(format!("fork: {e}")))
        }
    }
}

fn kill_and_reap(pid: Pid) {
    let _ = signal::kill(pid, Signal::SIGTERM);
    let _ = waitpid(pid, None);
}

/// Reads the child's `"<fmtp_port> <rpc_port>\n"` handshake line, bounded
/// to 100 bytes. Anything short of a full, parseable line is a `LOGIC`
/// failure.
fn read_handshake(read_end: &std::os::fd::OwnedFd) -> Result<(u16, u16), Error> {
    let mut buf = [0u8; 100];
    let mut got = 0usize;
    loop {
        match unistd::read(read_end.as_raw_fd(), &mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => {
                got += n;
                if got >= buf.len() {
                    break;
                }
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                return Err(Error::system_io(
                    "read child handshake",
                    io::Error::from_raw_os_error(e as i32),
                ))
            }
        }
    }

    let line = std::str::from_utf8(&buf[..got])
        .map_err(|_| Error::logic("sender child handshake is not valid UTF-8"))?;
    let line = line.trim_end_matches('\n');
    let mut parts = line.split_whitespace();
    let fmtp_port: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::logic("sender child did not report an fmtp port"))?;
    let rpc_port: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::logic("sender child did not report an rpc port"))?;
    if parts.next().is_some() {
        return Err(Error::logic("sender child handshake had trailing data"));
    }
    Ok((fmtp_port, rpc_port))
}

fn build_args(entry: &SenderEntry) -> Vec<String> {
    let mut args = Vec::new();
    args.push("-f".to_string());
    args.push(entry.feed.raw().to_string());
    args.push("-n".to_string());
    args.push(entry.subnet.network_length().to_string());
    // Harness-only addition: the real sender's arg list omits the subnet's
    // network address itself, which a real sender would recover from its
    // own configuration. The test harness needs it on the command line to
    // build a real subnet pool, so every child this supervisor spawns
    // receives it.
    args.push("-b".to_string());
    args.push(entry.subnet.first_address().to_string());
    if let Some(retx) = entry.retx_timeout_min {
        args.push("-r".to_string());
        args.push(retx.to_string());
    }
    args.push("-q".to_string());
    args.push(entry.product_queue_path.to_string_lossy().into_owned());
    args.push("-s".to_string());
    args.push(entry.fmtp_server.to_string());
    args.push("-t".to_string());
    args.push(entry.ttl.to_string());
    args.push(format!(
        "{}:{}",
        entry.mcast_group.ip(),
        entry.mcast_group.port()
    ));
    args
}
