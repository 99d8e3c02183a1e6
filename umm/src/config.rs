// SPDX-License-Identifier: BSD-3-Clause

//! A small line-oriented configuration reader: one `[sender]` stanza per
//! configured feed, in the same spirit as the teacher's preference for
//! explicit, hand-rolled parsers over a generic deserialization framework
//! for its own domain formats.
//!
//! ```text
//! [sender]
//! feed = IDS
//! mcast_group = 224.0.1.1:38800
//! fmtp_server = 0.0.0.0:0
//! ttl = 64
//! subnet = 10.1.1.0/24
//! product_queue = /var/lib/ldm/queue
//! # optional, omit for a non-VLAN sender
//! vc_switch = switch-a
//! vc_port = ge-0/0/1
//! vc_vlan = 100
//! # optional
//! retx_timeout_min = 60
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use cidr::Ipv4Cidr;
use umm_core::{Error, FeedSet};

use crate::entry::{SenderEntry, VcEndpoint};

/// Parses every `[sender]` stanza in `text` into a fresh, not-yet-running
/// [`SenderEntry`]. Blank lines separate stanzas; `#` starts a comment.
pub fn parse_str(text: &str) -> Result<Vec<SenderEntry>, Error> {
    let mut entries = Vec::new();
    let mut current: Option<Vec<(String, String)>> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if line == "[sender]" {
            if let Some(fields) = current.take() {
                entries.push(build_entry(&fields, lineno)?);
            }
            current = Some(Vec::new());
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(Error::inval(format!(
                "line {}: expected 'key = value', got '{line}'",
                lineno + 1
            )));
        };

        let fields = current.as_mut().ok_or_else(|| {
            Error::inval(format!("line {}: field outside of a [sender] stanza", lineno + 1))
        })?;
        fields.push((key.trim().to_string(), value.trim().to_string()));
    }

    if let Some(fields) = current.take() {
        entries.push(build_entry(&fields, text.lines().count())?);
    }

    Ok(entries)
}

fn field<'a>(fields: &'a [(String, String)], key: &str, lineno: usize) -> Result<&'a str, Error> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| Error::inval(format!("stanza ending at line {lineno}: missing '{key}'")))
}

fn optional_field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn build_entry(fields: &[(String, String)], lineno: usize) -> Result<SenderEntry, Error> {
    let feed = FeedSet::from_name(field(fields, "feed", lineno)?)?;

    let mcast_group: SocketAddr = field(fields, "mcast_group", lineno)?
        .parse()
        .map_err(|e| Error::inval(format!("stanza ending at line {lineno}: bad mcast_group: {e}")))?;

    let fmtp_server: SocketAddr = field(fields, "fmtp_server", lineno)?
        .parse()
        .map_err(|e| Error::inval(format!("stanza ending at line {lineno}: bad fmtp_server: {e}")))?;

    let ttl: u8 = field(fields, "ttl", lineno)?
        .parse()
        .map_err(|e| Error::inval(format!("stanza ending at line {lineno}: bad ttl: {e}")))?;

    let subnet: Ipv4Cidr = field(fields, "subnet", lineno)?
        .parse()
        .map_err(|e| Error::inval(format!("stanza ending at line {lineno}: bad subnet: {e}")))?;

    let product_queue_path = PathBuf::from(field(fields, "product_queue", lineno)?);

    let vc_endpoint = match (
        optional_field(fields, "vc_switch"),
        optional_field(fields, "vc_port"),
        optional_field(fields, "vc_vlan"),
    ) {
        (None, None, None) => None,
        (Some(switch_id), Some(port_id), Some(vlan_id)) => Some(VcEndpoint {
            switch_id: switch_id.to_string(),
            port_id: port_id.to_string(),
            vlan_id: vlan_id
                .parse()
                .map_err(|e| Error::inval(format!("stanza ending at line {lineno}: bad vc_vlan: {e}")))?,
        }),
        _ => {
            return Err(Error::inval(format!(
                "stanza ending at line {lineno}: vc_switch/vc_port/vc_vlan must all be present or all absent"
            )))
        }
    };

    let retx_timeout_min = optional_field(fields, "retx_timeout_min")
        .map(|v| {
            v.parse()
                .map_err(|e| Error::inval(format!("stanza ending at line {lineno}: bad retx_timeout_min: {e}")))
        })
        .transpose()?;

    Ok(SenderEntry {
        feed,
        mcast_group,
        fmtp_server,
        ttl,
        subnet,
        vc_endpoint,
        product_queue_path,
        retx_timeout_min,
        pid: 0,
        fmtp_port: 0,
        rpc_port: 0,
        circuit_id: None,
    })
}
