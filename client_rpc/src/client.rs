// SPDX-License-Identifier: BSD-3-Clause

//! The RPC service's client half: a single persistent connection that
//! sends the shared secret once and is reused for an entire UMM operation
//! sequence.

use std::net::{Ipv4Addr, SocketAddr, TcpStream};

use umm_core::Error;

use crate::wire;

pub struct RpcClient {
    stream: TcpStream,
    addr: SocketAddr,
    secret: u64,
}

impl RpcClient {
    /// Opens a connection to `addr` and sends `secret` as the connection
    /// preamble.
    pub fn connect(addr: SocketAddr, secret: u64) -> Result<Self, Error> {
        let stream =
            TcpStream::connect(addr).map_err(|e| Error::system_io(format!("connect {addr}"), e))?;
        let mut client = Self { stream, addr, secret };
        client.send_secret()?;
        Ok(client)
    }

    fn send_secret(&mut self) -> Result<(), Error> {
        wire::write_u64(&mut self.stream, self.secret)
            .map_err(|e| Error::system_io("send secret", e))
    }

    /// Re-opens the connection if it has dropped.
    pub fn reconnect(&mut self) -> Result<(), Error> {
        self.stream = TcpStream::connect(self.addr)
            .map_err(|e| Error::system_io(format!("reconnect {}", self.addr), e))?;
        self.send_secret()
    }

    /// `RESERVE_ADDR`: returns `None` if the pool was exhausted (the server
    /// signals this by writing `0.0.0.0`).
    pub fn reserve_addr(&mut self) -> Result<Option<Ipv4Addr>, Error> {
        wire::write_u32(&mut self.stream, wire::ACTION_RESERVE_ADDR)
            .map_err(|e| Error::system_io("send RESERVE_ADDR", e))?;
        let addr = wire::read_addr(&mut self.stream)
            .map_err(|e| Error::system_io("read RESERVE_ADDR reply", e))?;
        if addr.is_unspecified() {
            Ok(None)
        } else {
            Ok(Some(addr))
        }
    }

    /// `RELEASE_ADDR`: fails `NOENT` if `addr` was not reserved.
    pub fn release_addr(&mut self, addr: Ipv4Addr) -> Result<(), Error> {
        wire::write_u32(&mut self.stream, wire::ACTION_RELEASE_ADDR)
            .map_err(|e| Error::system_io("send RELEASE_ADDR", e))?;
        wire::write_addr(&mut self.stream, addr)
            .map_err(|e| Error::system_io("send RELEASE_ADDR addr", e))?;

        let status = wire::read_u32(&mut self.stream)
            .map_err(|e| Error::system_io("read RELEASE_ADDR reply", e))?
            .ok_or_else(|| Error::logic("server closed connection before RELEASE_ADDR reply"))?;

        match status {
            wire::STATUS_OK => Ok(()),
            wire::STATUS_NOENT => Err(Error::noent(format!("{addr} was not reserved"))),
            other => Err(Error::logic(format!("unexpected RELEASE_ADDR status {other}"))),
        }
    }

    /// `ALLOW_ADDR`: always succeeds.
    pub fn allow_addr(&mut self, addr: Ipv4Addr) -> Result<(), Error> {
        wire::write_u32(&mut self.stream, wire::ACTION_ALLOW_ADDR)
            .map_err(|e| Error::system_io("send ALLOW_ADDR", e))?;
        wire::write_addr(&mut self.stream, addr)
            .map_err(|e| Error::system_io("send ALLOW_ADDR addr", e))?;

        let status = wire::read_u32(&mut self.stream)
            .map_err(|e| Error::system_io("read ALLOW_ADDR reply", e))?
            .ok_or_else(|| Error::logic("server closed connection before ALLOW_ADDR reply"))?;

        match status {
            wire::STATUS_OK => Ok(()),
            other => Err(Error::logic(format!("unexpected ALLOW_ADDR status {other}"))),
        }
    }

    /// `CLOSE`: asks the server to close this connection and loop back to
    /// accept.
    pub fn close(mut self) -> Result<(), Error> {
        wire::write_u32(&mut self.stream, wire::ACTION_CLOSE)
            .map_err(|e| Error::system_io("send CLOSE", e))
    }
}
