// SPDX-License-Identifier: BSD-3-Clause

//! The shared sender registry: a cross-process table mapping each feed bit
//! to `{pid, fmtp_port, rpc_port}`, backed by a POSIX shared memory object
//! and serialized by a single advisory file-range lock.

use std::ffi::CString;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

use log::debug;
use umm_core::{feed::N_FEEDS, Error, FeedSet};

/// Name of the POSIX shared memory object backing the table.
pub const SHM_NAME: &str = "/mldmSenderMap";

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Row {
    pid: i32,
    fmtp_port: u16,
    rpc_port: u16,
}

const ROW_SIZE: usize = mem::size_of::<Row>();

/// A handle onto the shared table. One process typically holds exactly one
/// of these, shared across its own threads behind an `Arc`.
pub struct SharedSenderRegistry {
    fd: RawFd,
    map: *mut Row,
    table_len: usize,
    name: String,
    /// fcntl(2) byte-range locks are associated with the (process, inode)
    /// pair, not the file descriptor: two threads in the same process do
    /// *not* block each other by taking the same fcntl lock twice. This
    /// local mutex supplies the missing intra-process exclusion so that
    /// `lock()` genuinely serializes every caller, in-process and
    /// cross-process alike.
    local_lock: Mutex<()>,
}

// SAFETY: all reads/writes through `map` happen while `local_lock` (for
// this process) and the fcntl lock (across processes) are held.
unsafe impl Send for SharedSenderRegistry {}
unsafe impl Sync for SharedSenderRegistry {}

impl SharedSenderRegistry {
    /// Creates the shared memory object if it does not already exist
    /// (zeroing the table), or attaches to it if it does.
    pub fn init() -> Result<Self, Error> {
        Self::init_named(SHM_NAME)
    }

    /// Same as [`init`](Self::init), but against an arbitrary shared memory
    /// object name. Exposed so tests can run against private, uniquely
    /// named tables instead of contending for the single system-wide
    /// `mldmSenderMap` object.
    pub fn init_named(name: &str) -> Result<Self, Error> {
        let display_name = name.to_string();
        let name = CString::new(name).expect("shm name has no interior NUL");
        let table_len = ROW_SIZE * N_FEEDS as usize;

        let created_fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                0o600,
            )
        };

        let (fd, created) = if created_fd >= 0 {
            (created_fd, true)
        } else {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EEXIST) {
                return Err(Error::system_io("shm_open", err));
            }
            let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600) };
            if fd < 0 {
                return Err(Error::system_io("shm_open", io::Error::last_os_error()));
            }
            (fd, false)
        };

        if created && unsafe { libc::ftruncate(fd, table_len as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::system_io("ftruncate", err));
        }

        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                table_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if map == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::system_io("mmap", err));
        }

        let registry = Self {
            fd,
            map: map as *mut Row,
            table_len,
            name: display_name.clone(),
            local_lock: Mutex::new(()),
        };

        if created {
            debug!("created shared sender registry {display_name}");
            registry.lock()?.clear();
        } else {
            debug!("attached to existing shared sender registry {display_name}");
        }

        Ok(registry)
    }

    /// Acquires the table's single exclusive lock. Callers that need to
    /// compose several queries with a mutation (the supervisor's
    /// ensure-child-running algorithm) should hold one guard across all of
    /// them rather than calling `put`/`get`/`remove` individually.
    pub fn lock(&self) -> Result<RegistryGuard<'_>, Error> {
        let local = self.local_lock.lock().unwrap();

        let mut fl: libc::flock = unsafe { mem::zeroed() };
        fl.l_type = libc::F_WRLCK as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = ROW_SIZE as libc::off_t;

        let rc = unsafe { libc::fcntl(self.fd, libc::F_SETLKW, &mut fl as *mut libc::flock) };
        if rc != 0 {
            return Err(Error::system_io("fcntl(F_SETLKW)", io::Error::last_os_error()));
        }

        Ok(RegistryGuard {
            registry: self,
            _local: local,
        })
    }

    pub fn put(&self, feed: FeedSet, pid: i32, fmtp_port: u16, rpc_port: u16) -> Result<(), Error> {
        self.lock()?.put(feed, pid, fmtp_port, rpc_port)
    }

    pub fn get(&self, feed: FeedSet) -> Result<(i32, u16, u16), Error> {
        self.lock()?.get(feed)
    }

    pub fn remove(&self, pid: i32) -> Result<(), Error> {
        self.lock()?.remove(pid)
    }

    pub fn clear(&self) -> Result<(), Error> {
        self.lock()?.clear();
        Ok(())
    }

    /// Detaches from the shared memory region. If `final_` is set, also
    /// unlinks the shared object so no process can attach to it again.
    pub fn destroy(self, final_: bool) -> Result<(), Error> {
        unsafe {
            libc::munmap(self.map as *mut libc::c_void, self.table_len);
            libc::close(self.fd);
        }

        if final_ {
            let name = CString::new(self.name.as_str()).expect("shm name has no interior NUL");
            if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(Error::system_io("shm_unlink", err));
                }
            }
        }

        Ok(())
    }
}

/// Holds the table's lock for the duration of one or more operations.
/// Releases the fcntl lock (and the in-process mutex) on drop.
pub struct RegistryGuard<'a> {
    registry: &'a SharedSenderRegistry,
    _local: std::sync::MutexGuard<'a, ()>,
}

impl RegistryGuard<'_> {
    fn rows(&self) -> &mut [Row] {
        // SAFETY: exclusive access is guaranteed by holding this guard.
        unsafe { std::slice::from_raw_parts_mut(self.registry.map, N_FEEDS as usize) }
    }

    /// For each bit set in `feed`, fails `DUPLICATE` if that slot is
    /// occupied by a different pid, or if `pid` already occupies a slot
    /// outside `feed`. Otherwise sets every slot in `feed` to `pid` with
    /// the given ports.
    pub fn put(&self, feed: FeedSet, pid: i32, fmtp_port: u16, rpc_port: u16) -> Result<(), Error> {
        let rows = self.rows();

        for bit in feed.bits() {
            let row = rows[bit as usize];
            if row.pid != 0 && row.pid != pid {
                return Err(Error::duplicate(format!(
                    "feed bit {bit} already held by pid {}",
                    row.pid
                )));
            }
        }

        for (idx, row) in rows.iter().enumerate() {
            if row.pid == pid && !feed.contains(FeedSet::single(idx as u32)) {
                return Err(Error::duplicate(format!(
                    "pid {pid} already registered for feed bit {idx}"
                )));
            }
        }

        for bit in feed.bits() {
            rows[bit as usize] = Row {
                pid,
                fmtp_port,
                rpc_port,
            };
        }

        Ok(())
    }

    /// Returns the first matching slot in the intersection of `feed` and
    /// the occupied slots. Fails `NOENT` if none.
    pub fn get(&self, feed: FeedSet) -> Result<(i32, u16, u16), Error> {
        for bit in feed.bits() {
            let row = self.rows()[bit as usize];
            if row.pid != 0 {
                return Ok((row.pid, row.fmtp_port, row.rpc_port));
            }
        }
        Err(Error::noent(format!("no sender registered for feed {feed}")))
    }

    /// Zeroes every slot whose pid matches. Fails `NOENT` if none matched.
    pub fn remove(&self, pid: i32) -> Result<(), Error> {
        let mut found = false;
        for row in self.rows().iter_mut() {
            if row.pid == pid {
                *row = Row::default();
                found = true;
            }
        }
        if !found {
            return Err(Error::noent(format!("pid {pid} not registered")));
        }
        Ok(())
    }

    pub fn clear(&self) {
        for row in self.rows().iter_mut() {
            *row = Row::default();
        }
    }
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        let mut fl: libc::flock = unsafe { mem::zeroed() };
        fl.l_type = libc::F_UNLCK as libc::c_short;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        fl.l_start = 0;
        fl.l_len = ROW_SIZE as libc::off_t;

        // Best-effort: nothing useful to do if the unlock itself fails.
        unsafe {
            libc::fcntl(self.registry.fd, libc::F_SETLK, &mut fl as *mut libc::flock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use umm_core::feed::named;

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    /// Each test gets its own shared memory object so that parallel test
    /// threads never contend for the single system-wide `mldmSenderMap`.
    fn fresh_registry() -> SharedSenderRegistry {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("/ummTest{}_{n}", std::process::id());
        SharedSenderRegistry::init_named(&name).unwrap()
    }

    #[test]
    fn put_then_get_then_remove() {
        let registry = fresh_registry();

        registry.put(named::IDS, 4242, 38800, 38900).unwrap();
        let (pid, fmtp, rpc) = registry.get(named::IDS).unwrap();
        assert_eq!((pid, fmtp, rpc), (4242, 38800, 38900));

        registry.remove(4242).unwrap();
        let err = registry.get(named::IDS).unwrap_err();
        assert_eq!(err.kind(), umm_core::ErrorKind::NoEnt);

        registry.destroy(true).unwrap();
    }

    #[test]
    fn duplicate_pid_on_other_feed_is_rejected() {
        let registry = fresh_registry();

        registry
            .put(named::IDS.union(named::DDPLUS), 1, 38800, 38900)
            .unwrap();

        let err = registry.put(named::PPS, 1, 38800, 38900).unwrap_err();
        assert_eq!(err.kind(), umm_core::ErrorKind::Duplicate);

        let (pid, ..) = registry.get(named::IDS).unwrap();
        assert_eq!(pid, 1);

        registry.destroy(true).unwrap();
    }

    #[test]
    fn remove_unknown_pid_is_noent() {
        let registry = fresh_registry();
        let err = registry.remove(999_999).unwrap_err();
        assert_eq!(err.kind(), umm_core::ErrorKind::NoEnt);
        registry.destroy(true).unwrap();
    }
}
