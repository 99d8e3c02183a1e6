// SPDX-License-Identifier: BSD-3-Clause

//! Sender entries: the façade's per-feed configuration plus the in-memory
//! state a running child contributes once it has been spawned.

use std::net::SocketAddr;
use std::path::PathBuf;

use cidr::Ipv4Cidr;
use umm_core::FeedSet;

/// A local endpoint for an AL2S-style virtual circuit: switch, port and
/// VLAN identifiers. A non-VLAN sender is represented as `Option::None` on
/// [`SenderEntry::vc_endpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcEndpoint {
    pub switch_id: String,
    pub port_id: String,
    pub vlan_id: u16,
}

/// One configured sender, one per configured feed. Created by
/// [`crate::manager::UpstreamManager::add_sender`] and mutated in place as
/// its child spawns, is subscribed to, and eventually terminates.
#[derive(Debug, Clone)]
pub struct SenderEntry {
    pub feed: FeedSet,
    pub mcast_group: SocketAddr,
    pub fmtp_server: SocketAddr,
    pub ttl: u8,
    pub subnet: Ipv4Cidr,
    pub vc_endpoint: Option<VcEndpoint>,
    pub product_queue_path: PathBuf,
    pub retx_timeout_min: Option<u32>,

    /// 0 when no child is currently running for this entry.
    pub pid: i32,
    /// Non-zero once the child has reported its ports.
    pub fmtp_port: u16,
    pub rpc_port: u16,
    /// Set once the virtual-circuit provisioner has returned a circuit id
    /// for the entry's current subscriber; cleared on unsubscribe.
    pub circuit_id: Option<String>,
}

impl SenderEntry {
    pub fn is_vlan(&self) -> bool {
        self.vc_endpoint.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.pid != 0
    }

    /// Two entries conflict if they share any feed bit, share a multicast
    /// group address, or share a non-zero FMTP server host:port.
    pub fn conflicts_with(&self, other: &SenderEntry) -> bool {
        if self.feed.intersects(other.feed) {
            return true;
        }
        if self.mcast_group == other.mcast_group {
            return true;
        }
        let self_fmtp_set = self.fmtp_server.port() != 0;
        let other_fmtp_set = other.fmtp_server.port() != 0;
        if self_fmtp_set && other_fmtp_set && self.fmtp_server == other.fmtp_server {
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umm_core::feed::named;

    fn entry(feed: umm_core::FeedSet, mcast: &str, fmtp: &str) -> SenderEntry {
        SenderEntry {
            feed,
            mcast_group: mcast.parse().unwrap(),
            fmtp_server: fmtp.parse().unwrap(),
            ttl: 64,
            subnet: "10.0.0.0/24".parse().unwrap(),
            vc_endpoint: None,
            product_queue_path: PathBuf::from("/tmp/q"),
            retx_timeout_min: None,
            pid: 0,
            fmtp_port: 0,
            rpc_port: 0,
            circuit_id: None,
        }
    }

    #[test]
    fn disjoint_feeds_and_addresses_do_not_conflict() {
        let a = entry(named::IDS, "224.0.1.1:38800", "10.0.0.1:9000");
        let b = entry(named::PPS, "224.0.1.2:38800", "10.0.0.2:9000");
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn shared_feed_bit_conflicts() {
        let a = entry(named::IDS.union(named::PPS), "224.0.1.1:38800", "10.0.0.1:9000");
        let b = entry(named::PPS, "224.0.1.2:38800", "10.0.0.2:9000");
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn shared_mcast_group_conflicts() {
        let a = entry(named::IDS, "224.0.1.1:38800", "10.0.0.1:9000");
        let b = entry(named::PPS, "224.0.1.1:38800", "10.0.0.2:9000");
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn shared_nonzero_fmtp_server_conflicts() {
        let a = entry(named::IDS, "224.0.1.1:38800", "10.0.0.1:9000");
        let b = entry(named::PPS, "224.0.1.2:38800", "10.0.0.1:9000");
        assert!(a.conflicts_with(&b));
    }

    /// Two wildcard ("OS chooses") FMTP servers never conflict with each
    /// other, even though their socket addresses are textually identical.
    #[test]
    fn wildcard_fmtp_servers_never_conflict() {
        let a = entry(named::IDS, "224.0.1.1:38800", "0.0.0.0:0");
        let b = entry(named::PPS, "224.0.1.2:38800", "0.0.0.0:0");
        assert!(!a.conflicts_with(&b));
    }
}
