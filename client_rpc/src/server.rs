// SPDX-License-Identifier: BSD-3-Clause

//! The RPC service's server half: a bounded-concurrency accept loop fronted
//! by the shared-secret preamble, driving a `SubnetPool` and an
//! `Authorizer` for one fixed feed.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use subnet_pool::{Authorizer, SubnetPool};
use umm_core::{Error, FeedSet};

use crate::{secret, wire};

/// The server side of the client-address RPC service. One instance is
/// created by each sender child, bound to `127.0.0.1:0`, and its
/// `local_addr().port()` is part of the `"<fmtp_port> <rpc_port>\n"` line
/// the child reports to its parent.
pub struct RpcServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    secret: u64,
    secret_path: PathBuf,
    pool: Arc<SubnetPool>,
    authorizer: Arc<Authorizer>,
    feed: FeedSet,
    /// Self-pipe used to unblock the `poll` in `run()` from another thread.
    /// Closing the listening socket out from under a thread blocked in
    /// `accept(2)` is a classic use-after-close hazard on some platforms;
    /// a dedicated pipe fd avoids it entirely (DESIGN.md).
    stop_r: OwnedFd,
    stop_w: OwnedFd,
}

impl RpcServer {
    /// Binds a fresh loopback listener, generates and publishes the shared
    /// secret, and returns a server ready to `run()`.
    pub fn bind(pool: Arc<SubnetPool>, authorizer: Arc<Authorizer>, feed: FeedSet) -> Result<Self, Error> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| Error::system_io("bind rpc listener", e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::system_io("set_nonblocking", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::system_io("local_addr", e))?;

        let secret = secret::generate();
        let secret_path = secret::write(local_addr.port(), secret)?;

        let (stop_r, stop_w) =
            nix::unistd::pipe().map_err(|e| Error::system(format!("pipe: {e}")))?;

        Ok(Self {
            listener,
            local_addr,
            secret,
            secret_path,
            pool,
            authorizer,
            feed,
            stop_r,
            stop_w,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn secret(&self) -> u64 {
        self.secret
    }

    pub fn secret_path(&self) -> &std::path::Path {
        &self.secret_path
    }

    pub fn is_allowed(&self, addr: Ipv4Addr) -> bool {
        self.authorizer.is_authorized(addr, self.feed)
    }

    /// Runs the accept loop until [`stop`](Self::stop) is called from
    /// another thread, or an accept-level I/O error is fatal. Per-connection
    /// errors are logged and do not end the loop.
    pub fn run(&self) {
        let listener_fd = self.listener.as_raw_fd();
        let stop_fd = self.stop_r.as_raw_fd();

        loop {
            let listener_borrow = self.listener.as_fd();
            let stop_borrow = self.stop_r.as_fd();
            let mut fds = [
                PollFd::new(listener_borrow, PollFlags::POLLIN),
                PollFd::new(stop_borrow, PollFlags::POLLIN),
            ];

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    error!("rpc accept loop: poll failed: {e}");
                    break;
                }
            }

            let stop_ready = fds[1]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN));
            if stop_ready {
                debug!("rpc server on fd {listener_fd} stopping");
                break;
            }

            let accept_ready = fds[0]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN));
            if !accept_ready {
                continue;
            }

            match self.listener.accept() {
                Ok((stream, _peer)) => {
                    if let Err(e) = self.handle_connection(stream) {
                        warn!("rpc connection error: {e}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    error!("rpc accept failed: {e}");
                    break;
                }
            }
        }
    }

    /// Signals `run()` to return and unlinks the secret file.
    pub fn stop(&self) -> Result<(), Error> {
        let _ = nix::unistd::write(&self.stop_w, &[1u8]);
        secret::unlink(self.local_addr.port())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<(), Error> {
        stream
            .set_nonblocking(false)
            .map_err(|e| Error::system_io("set_nonblocking(false)", e))?;

        let client_secret =
            wire::read_u64(&mut stream).map_err(|e| Error::system_io("read secret", e))?;
        if client_secret != self.secret {
            debug!("rpc client presented wrong secret; closing connection");
            return Ok(());
        }

        loop {
            let action = match wire::read_u32(&mut stream) {
                Ok(Some(a)) => a,
                Ok(None) => return Ok(()),
                Err(e) => return Err(Error::system_io("read action", e)),
            };

            match action {
                wire::ACTION_RESERVE_ADDR => self.do_reserve(&mut stream)?,
                wire::ACTION_RELEASE_ADDR => self.do_release(&mut stream)?,
                wire::ACTION_ALLOW_ADDR => self.do_allow(&mut stream)?,
                wire::ACTION_CLOSE => return Ok(()),
                other => {
                    warn!("rpc connection sent unknown action {other}; closing");
                    return Ok(());
                }
            }
        }
    }

    fn do_reserve(&self, stream: &mut TcpStream) -> Result<(), Error> {
        let addr = match self.pool.reserve() {
            Ok(addr) => {
                self.authorizer.authorize(addr, self.feed);
                addr
            }
            Err(_) => Ipv4Addr::UNSPECIFIED,
        };
        wire::write_addr(stream, addr).map_err(|e| Error::system_io("write reserve reply", e))
    }

    fn do_release(&self, stream: &mut TcpStream) -> Result<(), Error> {
        let addr = wire::read_addr(stream).map_err(|e| Error::system_io("read release addr", e))?;
        let status = match self.pool.release(addr) {
            Ok(()) => {
                self.authorizer.unauthorize(addr, self.feed);
                wire::STATUS_OK
            }
            Err(_) => wire::STATUS_NOENT,
        };
        wire::write_u32(stream, status).map_err(|e| Error::system_io("write release reply", e))
    }

    fn do_allow(&self, stream: &mut TcpStream) -> Result<(), Error> {
        let addr = wire::read_addr(stream).map_err(|e| Error::system_io("read allow addr", e))?;
        self.authorizer.authorize(addr, self.feed);
        wire::write_u32(stream, wire::STATUS_OK).map_err(|e| Error::system_io("write allow reply", e))
    }
}
