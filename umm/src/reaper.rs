// SPDX-License-Identifier: BSD-3-Clause

//! `SIGCHLD` reaping: a dedicated thread waits for children to exit and
//! calls [`UpstreamManager::terminated`] for each one reaped. The signal
//! handler itself only writes a byte to a self-pipe — the same
//! cancellable-poll idiom used by [`client_rpc::server::RpcServer`] — so
//! the reaping logic runs in ordinary, non-signal-context code.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicI32, Ordering};

use log::{error, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::manager::UpstreamManager;

static SIGCHLD_PIPE_W: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_sigchld(_: libc::c_int) {
    let fd = SIGCHLD_PIPE_W.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte: [u8; 1] = [1];
        unsafe {
            libc::write(fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// Installs the `SIGCHLD` handler and owns the self-pipe fds for its
/// lifetime. Only one `Reaper` should be installed per process.
pub struct Reaper {
    sigchld_r: OwnedFd,
    _sigchld_w: OwnedFd,
    stop_r: OwnedFd,
    stop_w: OwnedFd,
}

impl Reaper {
    pub fn install() -> Result<Self, umm_core::Error> {
        let (sigchld_r, sigchld_w) =
            nix::unistd::pipe().map_err(|e| umm_core::Error::system(format!("pipe: {e}")))?;
        let (stop_r, stop_w) =
            nix::unistd::pipe().map_err(|e| umm_core::Error::system(format!("pipe: {e}")))?;

        SIGCHLD_PIPE_W.store(sigchld_w.as_raw_fd(), Ordering::Relaxed);

        let action = SigAction::new(
            SigHandler::Handler(on_sigchld),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        unsafe {
            signal::sigaction(Signal::SIGCHLD, &action)
                .map_err(|e| umm_core::Error::system(format!("sigaction(SIGCHLD): {e}")))?;
        }

        Ok(Self {
            sigchld_r,
            _sigchld_w: sigchld_w,
            stop_r,
            stop_w,
        })
    }

    /// Blocks, reaping every exited child and calling
    /// [`UpstreamManager::terminated`] for it, until [`stop`](Self::stop) is
    /// called.
    pub fn run(&self, manager: &UpstreamManager) {
        loop {
            let sigchld_borrow = self.sigchld_r.as_fd();
            let stop_borrow = self.stop_r.as_fd();
            let mut fds = [
                PollFd::new(sigchld_borrow, PollFlags::POLLIN),
                PollFd::new(stop_borrow, PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    error!("sigchld reaper: poll failed: {e}");
                    break;
                }
            }

            if fds[1].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
                break;
            }

            if fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
                let mut drain = [0u8; 64];
                let _ = nix::unistd::read(self.sigchld_r.as_raw_fd(), &mut drain);
                self.reap_all(manager);
            }
        }
    }

    fn reap_all(&self, manager: &UpstreamManager) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                    if let Err(e) = manager.terminated(pid.as_raw()) {
                        error!("terminated({}) failed: {e}", pid.as_raw());
                    }
                }
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => {
                    warn!("waitpid failed while reaping: {e}");
                    break;
                }
            }
        }
    }

    pub fn stop(&self) {
        let _ = nix::unistd::write(&self.stop_w, &[1u8]);
    }
}
