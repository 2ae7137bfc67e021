//! Canonical data model shared by every pipeline stage (spec §3).
//!
//! `RawEvent` is the transient, per-ingestor shape; `CimRecord` is the
//! normalized, schema-fixed event that everything downstream consumes.

use md5::{Digest as Md5Digest, Md5};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::net::IpAddr;

/// Where a `RawEvent` came from (spec §3 RawEvent.source kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Pcap,
    NetflowV5,
    NetflowV9,
    Sflow,
    Api,
}

/// A transient, per-packet/datagram/request event produced by an ingestor.
/// Never leaves the ingestor; destroyed after normalization (spec §3).
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub source: SourceKind,
    pub exporter: Option<IpAddr>,
    pub arrival_time_ns: i64,
    pub fields: RawFields,
}

/// Best-effort decoded fields carried out of an ingestor.
///
/// Modeled as a named struct with `Option`s rather than a dynamic map: the
/// source's heterogeneous dict flowing through every stage is exactly the
/// anti-pattern spec §9 "Dynamic/duck-typed record handling" calls out for
/// replacement. `extras` carries the small number of NetFlow-v5-only fields
/// that are not part of the canonical schema (spec §3 supplement).
#[derive(Debug, Clone, Default)]
pub struct RawFields {
    pub src_ip: Option<IpAddr>,
    pub dest_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dest_port: Option<u16>,
    pub protocol: Option<Transport>,
    pub bytes: Option<u64>,
    pub packets: Option<u64>,
    pub tcp_flags: Option<u8>,
    pub start_time_ns: Option<i64>,
    pub end_time_ns: Option<i64>,
    pub extras: Option<NetFlowExtras>,
}

/// Fields present only on NetFlow v5 records (spec §3 supplement).
#[derive(Debug, Clone, Default)]
pub struct NetFlowExtras {
    pub next_hop: Option<IpAddr>,
    pub input_interface: Option<u16>,
    pub output_interface: Option<u16>,
    pub tos: Option<u8>,
    pub src_as: Option<u16>,
    pub dst_as: Option<u16>,
    pub src_mask: Option<u8>,
    pub dst_mask: Option<u8>,
}

/// Named transport protocols (spec §3: "transport is always a known
/// symbolic name"). `Other` preserves the numeric value for unmapped
/// protocols (`proto_<n>` per spec §4.1's NetFlow protocol table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Transport {
    Tcp,
    Udp,
    Icmp,
    Gre,
    Esp,
    Ah,
    Icmpv6,
    Ospf,
    Sctp,
    #[serde(untagged)]
    Other(u8),
}

impl Transport {
    /// Maps a NetFlow/IP protocol number to a symbolic transport (spec §4.1).
    pub fn from_proto_number(n: u8) -> Self {
        match n {
            1 => Transport::Icmp,
            6 => Transport::Tcp,
            17 => Transport::Udp,
            47 => Transport::Gre,
            50 => Transport::Esp,
            51 => Transport::Ah,
            58 => Transport::Icmpv6,
            89 => Transport::Ospf,
            132 => Transport::Sctp,
            other => Transport::Other(other),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Transport::Tcp => "TCP".to_string(),
            Transport::Udp => "UDP".to_string(),
            Transport::Icmp => "ICMP".to_string(),
            Transport::Gre => "GRE".to_string(),
            Transport::Esp => "ESP".to_string(),
            Transport::Ah => "AH".to_string(),
            Transport::Icmpv6 => "ICMPv6".to_string(),
            Transport::Ospf => "OSPF".to_string(),
            Transport::Sctp => "SCTP".to_string(),
            Transport::Other(n) => format!("proto_{n}"),
        }
    }
}

/// Traffic direction relative to the internal network (spec §3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    Internal,
    External,
}

/// The canonical information model record (spec §3 "CIM Record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CimRecord {
    pub event_id: String,
    pub event_time_ns: i64,
    pub source: SourceKind,
    pub src_ip: Option<IpAddr>,
    pub dest_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dest_port: Option<u16>,
    pub transport: Transport,
    pub bytes: u64,
    pub packets: u64,
    pub direction: Direction,
    pub tcp_flags: u8,
    pub duration_secs: f64,
    pub is_internal: bool,
    pub raw_hash: String,
}

/// Private/loopback membership check (spec §3, §4.2: RFC1918 + loopback).
pub fn is_internal_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

/// `direction` per spec §4.2: both internal -> internal; src internal only ->
/// outbound; dst internal only -> inbound; else external.
pub fn determine_direction(src: Option<IpAddr>, dest: Option<IpAddr>) -> Direction {
    let src_internal = src.map(is_internal_ip).unwrap_or(false);
    let dest_internal = dest.map(is_internal_ip).unwrap_or(false);
    match (src_internal, dest_internal) {
        (true, true) => Direction::Internal,
        (true, false) => Direction::Outbound,
        (false, true) => Direction::Inbound,
        (false, false) => Direction::External,
    }
}

/// `event_id = "evt_" || hex(sha256(src_ip:dest_ip:src_port:dest_port:ns)[0:16])`
/// (spec §4.2).
pub fn compute_event_id(
    src_ip: Option<IpAddr>,
    dest_ip: Option<IpAddr>,
    src_port: Option<u16>,
    dest_port: Option<u16>,
    ns_since_epoch: i64,
) -> String {
    let components = format!(
        "{}:{}:{}:{}:{}",
        opt_to_string(src_ip),
        opt_to_string(dest_ip),
        opt_to_string(src_port),
        opt_to_string(dest_port),
        ns_since_epoch,
    );
    let digest = Sha256::digest(components.as_bytes());
    let hex = hex::encode(digest);
    format!("evt_{}", &hex[0..16])
}

/// `raw_hash = hex(md5(src_ip:dest_ip:src_port:dest_port:protocol))` (spec §4.2).
pub fn compute_raw_hash(
    src_ip: Option<IpAddr>,
    dest_ip: Option<IpAddr>,
    src_port: Option<u16>,
    dest_port: Option<u16>,
    transport: Transport,
) -> String {
    let components = format!(
        "{}:{}:{}:{}:{}",
        opt_to_string(src_ip),
        opt_to_string(dest_ip),
        opt_to_string(src_port),
        opt_to_string(dest_port),
        transport.as_str(),
    );
    let digest = Md5::digest(components.as_bytes());
    hex::encode(digest)
}

fn opt_to_string<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

/// Flat symbol-count table used by entropy accumulators, capped per spec §4.3
/// ("symbol-count tables capped at 4096 distinct symbols per flow"). Excess
/// symbols are bucketed to `other`.
#[derive(Debug, Clone, Default)]
pub struct SymbolCounts {
    counts: HashMap<String, u64>,
    other: u64,
    cap: usize,
}

impl SymbolCounts {
    pub fn new(cap: usize) -> Self {
        Self {
            counts: HashMap::new(),
            other: 0,
            cap,
        }
    }

    pub fn observe(&mut self, symbol: &str) {
        if self.counts.contains_key(symbol) || self.counts.len() < self.cap {
            *self.counts.entry(symbol.to_string()).or_insert(0) += 1;
        } else {
            self.other += 1;
        }
    }

    /// Shannon entropy (base 2) over the observed symbol distribution.
    pub fn shannon_entropy(&self) -> f64 {
        let total: u64 = self.counts.values().sum::<u64>() + self.other;
        if total == 0 {
            return 0.0;
        }
        let total = total as f64;
        let mut h = 0.0;
        for &c in self.counts.values() {
            if c == 0 {
                continue;
            }
            let p = c as f64 / total;
            h -= p * p.log2();
        }
        if self.other > 0 {
            let p = self.other as f64 / total;
            h -= p * p.log2();
        }
        if h.is_nan() || h.is_infinite() {
            0.0
        } else {
            h
        }
    }

    pub fn distinct_count(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn direction_matches_internal_membership() {
        let internal = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let external = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(
            determine_direction(Some(internal), Some(internal)),
            Direction::Internal
        );
        assert_eq!(
            determine_direction(Some(internal), Some(external)),
            Direction::Outbound
        );
        assert_eq!(
            determine_direction(Some(external), Some(internal)),
            Direction::Inbound
        );
        assert_eq!(
            determine_direction(Some(external), Some(external)),
            Direction::External
        );
    }

    #[test]
    fn event_id_is_deterministic_and_prefixed() {
        let ip = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        let a = compute_event_id(Some(ip), Some(ip), Some(1), Some(2), 100);
        let b = compute_event_id(Some(ip), Some(ip), Some(1), Some(2), 100);
        assert_eq!(a, b);
        assert!(a.starts_with("evt_"));
        assert_eq!(a.len(), "evt_".len() + 16);
    }

    #[test]
    fn symbol_counts_cap_buckets_to_other() {
        let mut sc = SymbolCounts::new(2);
        sc.observe("a");
        sc.observe("b");
        sc.observe("c");
        assert_eq!(sc.distinct_count(), 2);
        assert!(sc.shannon_entropy() >= 0.0);
    }
}
