// SPDX-License-Identifier: BSD-3-Clause

//! The fixed-width wire format used between [`crate::client::RpcClient`] and
//! [`crate::server::RpcServer`]. All fields are host-byte-order except the
//! address itself, which travels in network byte order as an IPv4 address
//! would anywhere else in the stack.

use std::io::{self, Read, Write};
use std::net::Ipv4Addr;

pub const ACTION_RESERVE_ADDR: u32 = 1;
pub const ACTION_RELEASE_ADDR: u32 = 2;
pub const ACTION_ALLOW_ADDR: u32 = 3;
pub const ACTION_CLOSE: u32 = 4;

pub const STATUS_OK: u32 = 0;
pub const STATUS_NOENT: u32 = 1;

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

/// Reads a 32-bit field. A short read of the action field is treated as
/// CLOSE; callers that need that behavior should match on `Ok(None)`
/// explicitly rather than treating EOF as an error.
pub fn read_u32<R: Read>(r: &mut R) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut got = 0;
    while got < buf.len() {
        match r.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    if got == 0 {
        return Ok(None);
    }
    if got < buf.len() {
        return Ok(None);
    }
    Ok(Some(u32::from_ne_bytes(buf)))
}

pub fn write_addr<W: Write>(w: &mut W, addr: Ipv4Addr) -> io::Result<()> {
    w.write_all(&addr.octets())
}

pub fn read_addr<R: Read>(r: &mut R) -> io::Result<Ipv4Addr> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(Ipv4Addr::from(buf))
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_ne_bytes())
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_ne_bytes(buf))
}
