// SPDX-License-Identifier: BSD-3-Clause

//! The UMM façade: the only public surface on the top side, owning the
//! configured sender entries and driving the supervisor and RPC
//! collaborators underneath them.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use client_rpc::{secret, RpcClient};
use sender_registry::SharedSenderRegistry;
use umm_core::{Error, ErrorKind, FeedSet};

use crate::entry::SenderEntry;
use crate::{spawn, vc};

/// Owns every configured sender entry plus the collaborators needed to
/// spawn and reach the sender children. One instance per UMM process.
pub struct UpstreamManager {
    entries: Mutex<Vec<SenderEntry>>,
    ssr: Arc<SharedSenderRegistry>,
    sender_bin: PathBuf,
    vc_command: Option<PathBuf>,
}

impl UpstreamManager {
    pub fn new(ssr: SharedSenderRegistry, sender_bin: impl Into<PathBuf>, vc_command: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ssr: Arc::new(ssr),
            sender_bin: sender_bin.into(),
            vc_command,
        }
    }

    /// Inserts a configured entry, failing `DUPLICATE` if it would conflict
    /// with an existing one under [`SenderEntry::conflicts_with`], including
    /// an identical re-add (see DESIGN.md's open-question resolution).
    pub fn add_sender(&self, entry: SenderEntry) -> Result<(), Error> {
        if entry.ttl >= 255 {
            return Err(Error::inval(format!("ttl {} is not in [0,254]", entry.ttl)));
        }

        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|existing| existing.conflicts_with(&entry)) {
            return Err(Error::duplicate(format!(
                "sender entry for feed {} conflicts with an existing entry",
                entry.feed
            )));
        }
        entries.push(entry);
        Ok(())
    }

    fn find_entry_index(&self, feed: FeedSet) -> Result<usize, Error> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .position(|e| e.feed.contains(feed))
            .ok_or_else(|| Error::noent(format!("no sender entry configured for feed {feed}")))
    }

    /// The cached sender pid for `feed`, if any entry matches and a child
    /// is running. Mainly useful to tests asserting the "at most one
    /// spawn" concurrency guarantee.
    pub fn entry_pid(&self, feed: FeedSet) -> Option<i32> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.feed.contains(feed))
            .map(|e| e.pid)
            .filter(|pid| *pid != 0)
    }

    fn connect_rpc(&self, rpc_port: u16) -> Result<RpcClient, Error> {
        let shared_secret = secret::read(rpc_port)?;
        let addr = (Ipv4Addr::LOCALHOST, rpc_port).into();
        RpcClient::connect(addr, shared_secret)
    }

    fn ensure_entry_running(&self, idx: usize) -> Result<(), Error> {
        let snapshot = {
            let entries = self.entries.lock().unwrap();
            entries[idx].clone()
        };

        let (pid, fmtp_port, rpc_port) = spawn::ensure_child_running(&snapshot, &self.ssr, &self.sender_bin)?;

        let mut entries = self.entries.lock().unwrap();
        entries[idx].pid = pid;
        entries[idx].fmtp_port = fmtp_port;
        entries[idx].rpc_port = rpc_port;
        Ok(())
    }

    /// Subscribes `client_addr` to `feed`, returning the client's CIDR
    /// (address plus prefix length).
    pub fn subscribe(
        &self,
        feed: FeedSet,
        client_addr: Ipv4Addr,
        remote_vc_endpoint: Option<crate::entry::VcEndpoint>,
    ) -> Result<(Ipv4Addr, u8), Error> {
        if !feed.is_single_bit() {
            return Err(Error::inval(format!("subscribe requires exactly one feed bit, got {feed}")));
        }
        let idx = self.find_entry_index(feed)?;

        let (vlan, local_endpoint) = {
            let entries = self.entries.lock().unwrap();
            let e = &entries[idx];
            (e.is_vlan(), e.vc_endpoint.clone())
        };

        let mut provisioned_circuit: Option<String> = None;
        if vlan {
            let local_endpoint = local_endpoint.expect("is_vlan implies vc_endpoint is Some");
            let remote = remote_vc_endpoint.ok_or_else(|| {
                Error::inval("VLAN subscribe requires a remote virtual-circuit endpoint")
            })?;
            let vc_command = self
                .vc_command
                .as_deref()
                .ok_or_else(|| Error::logic("no virtual-circuit provisioner is configured"))?;

            let circuit_id = vc::provision(
                vc_command,
                &format!("feed-{feed}"),
                "umm subscribe",
                &local_endpoint,
                &remote,
            )?;
            self.entries.lock().unwrap()[idx].circuit_id = Some(circuit_id.clone());
            provisioned_circuit = Some(circuit_id);
        }

        match self.subscribe_inner(idx, vlan, client_addr) {
            Ok(v) => Ok(v),
            Err(err) => {
                if let Some(circuit_id) = provisioned_circuit {
                    if let Some(vc_command) = self.vc_command.as_deref() {
                        let _ = vc::destroy(vc_command, &circuit_id);
                    }
                }
                Err(err)
            }
        }
    }

    fn subscribe_inner(&self, idx: usize, vlan: bool, client_addr: Ipv4Addr) -> Result<(Ipv4Addr, u8), Error> {
        self.ensure_entry_running(idx)?;

        let (rpc_port, prefix_len) = {
            let entries = self.entries.lock().unwrap();
            let e = &entries[idx];
            (e.rpc_port, e.subnet.network_length())
        };

        let mut client = self.connect_rpc(rpc_port)?;
        if vlan {
            let addr = client
                .reserve_addr()?
                .ok_or_else(|| Error::pool_exhausted("no free address for subscriber"))?;
            client.close()?;
            Ok((addr, prefix_len))
        } else {
            client.allow_addr(client_addr)?;
            client.close()?;
            Ok((client_addr, 32))
        }
    }

    /// Unsubscribes `client_addr` from `feed`. Non-VLAN unsubscribe is a
    /// deliberate no-op at this layer: the child's authorizer keeps the
    /// address until the child itself terminates (see DESIGN.md's
    /// open-question resolution).
    pub fn unsubscribe(&self, feed: FeedSet, client_addr: Ipv4Addr) -> Result<(), Error> {
        if !feed.is_single_bit() {
            return Err(Error::inval(format!("unsubscribe requires exactly one feed bit, got {feed}")));
        }
        let idx = self.find_entry_index(feed)?;

        let (vlan, rpc_port, circuit_id) = {
            let mut entries = self.entries.lock().unwrap();
            let e = &mut entries[idx];
            (e.is_vlan(), e.rpc_port, e.circuit_id.take())
        };

        if !vlan {
            return Ok(());
        }

        if rpc_port != 0 {
            let mut client = self.connect_rpc(rpc_port)?;
            client.release_addr(client_addr)?;
            client.close()?;
        }

        if let Some(circuit_id) = circuit_id {
            let vc_command = self
                .vc_command
                .as_deref()
                .ok_or_else(|| Error::logic("no virtual-circuit provisioner is configured"))?;
            vc::destroy(vc_command, &circuit_id)?;
        }

        Ok(())
    }

    /// Called by the `SIGCHLD` reaper once `waitpid` has reaped `pid`.
    pub fn terminated(&self, pid: i32) -> Result<(), Error> {
        if let Err(e) = self.ssr.remove(pid) {
            if e.kind() != ErrorKind::NoEnt {
                return Err(e);
            }
        }

        let mut entries = self.entries.lock().unwrap();
        for e in entries.iter_mut() {
            if e.pid == pid {
                e.pid = 0;
                e.fmtp_port = 0;
                e.rpc_port = 0;
            }
        }
        Ok(())
    }

    /// Frees every in-memory entry and the SSR handle. Fails `LOGIC` if
    /// another reference to the registry (e.g. a still-running reaper)
    /// outlives this call.
    pub fn umm_destroy(self, final_: bool) -> Result<(), Error> {
        self.entries.lock().unwrap().clear();
        match Arc::try_unwrap(self.ssr) {
            Ok(ssr) => ssr.destroy(final_),
            Err(_) => Err(Error::logic(
                "cannot destroy: the shared sender registry still has other references",
            )),
        }
    }
}
