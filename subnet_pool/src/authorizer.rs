// SPDX-License-Identifier: BSD-3-Clause

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use umm_core::FeedSet;

/// Maps each authorized client address to the feed-set it may subscribe to.
/// In the one-feed-per-child configuration the RPC service always calls
/// these with the child's single fixed feed, so in practice this reduces to
/// a plain set of allowed addresses, but the map is kept general so a
/// future multi-feed sender can share one authorizer.
#[derive(Default)]
pub struct Authorizer {
    inner: Mutex<HashMap<Ipv4Addr, HashSet<FeedSet>>>,
}

impl Authorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorize(&self, addr: Ipv4Addr, feed: FeedSet) {
        self.inner.lock().unwrap().entry(addr).or_default().insert(feed);
    }

    pub fn is_authorized(&self, addr: Ipv4Addr, feed: FeedSet) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(&addr)
            .is_some_and(|feeds| feeds.contains(&feed))
    }

    pub fn unauthorize(&self, addr: Ipv4Addr, feed: FeedSet) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(feeds) = inner.get_mut(&addr) {
            feeds.remove(&feed);
            if feeds.is_empty() {
                inner.remove(&addr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umm_core::feed::named;

    #[test]
    fn authorize_and_unauthorize() {
        let auth = Authorizer::new();
        let addr = Ipv4Addr::new(1, 0, 0, 5);

        assert!(!auth.is_authorized(addr, named::IDS));
        auth.authorize(addr, named::IDS);
        assert!(auth.is_authorized(addr, named::IDS));
        assert!(!auth.is_authorized(addr, named::PPS));

        auth.unauthorize(addr, named::IDS);
        assert!(!auth.is_authorized(addr, named::IDS));
    }
}
