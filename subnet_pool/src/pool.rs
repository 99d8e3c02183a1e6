// SPDX-License-Identifier: BSD-3-Clause

use std::collections::{HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use cidr::{Inet, Ipv4Cidr};
use umm_core::Error;

/// Tracks which host addresses within a CIDR subnet are free vs. reserved.
/// The free queue is FIFO, so recycling has fairness properties and eases
/// debugging: the most recently released address is the last one handed
/// back out again.
pub struct SubnetPool {
    cidr: Ipv4Cidr,
    inner: Mutex<Inner>,
}

struct Inner {
    free: VecDeque<Ipv4Addr>,
    reserved: HashSet<Ipv4Addr>,
}

impl SubnetPool {
    /// Builds a pool over every usable host address in `cidr` (network and
    /// broadcast excluded). A subnet with fewer than 2 usable hosts (prefix
    /// longer than /30) is rejected as `INVAL`.
    pub fn new(cidr: Ipv4Cidr) -> Result<Self, Error> {
        if cidr.network_length() > 30 {
            return Err(Error::inval(format!(
                "subnet {cidr} has fewer than 2 usable host addresses"
            )));
        }

        let network: u32 = u32::from(cidr.first_address());
        let broadcast: u32 = u32::from(cidr.last_address());

        let free: VecDeque<Ipv4Addr> = ((network + 1)..broadcast).map(Ipv4Addr::from).collect();

        Ok(Self {
            cidr,
            inner: Mutex::new(Inner {
                free,
                reserved: HashSet::new(),
            }),
        })
    }

    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    /// Dequeues the head of the free queue and moves it to the reserved set.
    /// Fails `POOL_EXHAUSTED` when the free queue is empty.
    pub fn reserve(&self) -> Result<Ipv4Addr, Error> {
        let mut inner = self.inner.lock().unwrap();
        let addr = inner
            .free
            .pop_front()
            .ok_or_else(|| Error::pool_exhausted(format!("no free address in {}", self.cidr)))?;
        inner.reserved.insert(addr);
        Ok(addr)
    }

    /// Removes `addr` from the reserved set and appends it to the free
    /// queue. Fails `NOENT` if `addr` was not reserved.
    pub fn release(&self, addr: Ipv4Addr) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.reserved.remove(&addr) {
            return Err(Error::noent(format!("{addr} is not reserved")));
        }
        inner.free.push_back(addr);
        Ok(())
    }

    pub fn is_reserved(&self, addr: Ipv4Addr) -> bool {
        self.inner.lock().unwrap().reserved.contains(&addr)
    }

    /// Total number of host addresses (free + reserved) this pool manages.
    pub fn size(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.free.len() + inner.reserved.len()
    }

    pub fn count_free(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }

    pub fn count_reserved(&self) -> usize {
        self.inner.lock().unwrap().reserved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn cidr(s: &str) -> Ipv4Cidr {
        Ipv4Cidr::from_str(s).unwrap()
    }

    #[test]
    fn reserve_and_release_round_trip() {
        let pool = SubnetPool::new(cidr("1.0.0.0/24")).unwrap();
        let before = pool.count_free();

        let addr = pool.reserve().unwrap();
        assert!(pool.is_reserved(addr));
        assert_eq!(pool.count_free(), before - 1);

        pool.release(addr).unwrap();
        assert!(!pool.is_reserved(addr));
        assert_eq!(pool.count_free(), before);
    }

    #[test]
    fn release_never_reserved_is_noent() {
        let pool = SubnetPool::new(cidr("1.0.0.0/24")).unwrap();
        let err = pool.release(Ipv4Addr::new(192, 168, 0, 1)).unwrap_err();
        assert_eq!(err.kind(), umm_core::ErrorKind::NoEnt);
    }

    #[test]
    fn fifo_recycling() {
        let pool = SubnetPool::new(cidr("1.0.0.0/30")).unwrap();
        assert_eq!(pool.size(), 2);

        let first = pool.reserve().unwrap();
        let second = pool.reserve().unwrap();
        assert!(pool.reserve().is_err());

        pool.release(first).unwrap();
        let third = pool.reserve().unwrap();
        assert_eq!(third, first);
        assert_ne!(second, first);
    }

    #[test]
    fn slash_30_allows_exactly_two_reservations() {
        let pool = SubnetPool::new(cidr("10.0.0.0/30")).unwrap();
        assert!(pool.reserve().is_ok());
        assert!(pool.reserve().is_ok());
        let err = pool.reserve().unwrap_err();
        assert_eq!(err.kind(), umm_core::ErrorKind::PoolExhausted);
    }

    #[test]
    fn reserved_addresses_stay_within_subnet() {
        let pool = SubnetPool::new(cidr("172.16.5.0/28")).unwrap();
        let network = u32::from(pool.cidr().first_address());
        let broadcast = u32::from(pool.cidr().last_address());

        while let Ok(addr) = pool.reserve() {
            let raw = u32::from(addr);
            assert!(raw > network && raw < broadcast);
        }
    }

    #[test]
    fn too_small_subnet_is_rejected() {
        assert!(SubnetPool::new(cidr("10.0.0.0/31")).is_err());
        assert!(SubnetPool::new(cidr("10.0.0.0/32")).is_err());
    }
}
