// SPDX-License-Identifier: BSD-3-Clause

//! Shared-secret distribution: a 64-bit value generated at server startup,
//! written to `$HOME/mldmrpc_<port>` with mode 0600, and unlinked at
//! shutdown. Same-UID local authentication only; never transmitted over
//! anything but loopback.

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use rand::RngCore;
use umm_core::Error;

pub fn generate() -> u64 {
    rand::rng().next_u64()
}

pub fn path_for_port(port: u16) -> Result<PathBuf, Error> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::system("HOME is not set; cannot locate the secret file"))?;
    Ok(PathBuf::from(home).join(format!("mldmrpc_{port}")))
}

/// Writes `secret` to the well-known path for `port`, creating the file
/// with mode 0600 so only this UID can read it.
pub fn write(port: u16, secret: u64) -> Result<PathBuf, Error> {
    let path = path_for_port(port)?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&path)
        .map_err(|e| Error::system_io(format!("open {}", path.display()), e))?;

    file.write_all(&secret.to_ne_bytes())
        .map_err(|e| Error::system_io(format!("write {}", path.display()), e))?;

    Ok(path)
}

/// Reads the secret previously written by [`write`] for `port`.
pub fn read(port: u16) -> Result<u64, Error> {
    let path = path_for_port(port)?;
    let bytes = fs::read(&path).map_err(|e| Error::system_io(format!("read {}", path.display()), e))?;
    let arr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::logic(format!("{} does not contain an 8-byte secret", path.display())))?;
    Ok(u64::from_ne_bytes(arr))
}

pub fn unlink(port: u16) -> Result<(), Error> {
    let path = path_for_port(port)?;
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::system_io(format!("remove {}", path.display()), e)),
    }
}
