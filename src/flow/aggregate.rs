//! `FlowAggregate`: the mutable per-(flow, window) state (spec §3, §4.3).

use crate::cim::{CimRecord, SymbolCounts};
use crate::flow::moments::{QuantileSketch, RunningMoments};
use std::net::IpAddr;

/// TCP flag masks (spec §4.3).
pub mod flag_mask {
    pub const SYN: u8 = 0x02;
    pub const ACK: u8 = 0x10;
    pub const FIN: u8 = 0x01;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const URG: u8 = 0x20;
}

#[derive(Debug, Clone, Default, Copy)]
pub struct FlagCounts {
    pub syn: u64,
    pub ack: u64,
    pub fin: u64,
    pub rst: u64,
    pub psh: u64,
    pub urg: u64,
}

impl FlagCounts {
    fn observe(&mut self, flags: u8) {
        if flags & flag_mask::SYN != 0 {
            self.syn += 1;
        }
        if flags & flag_mask::ACK != 0 {
            self.ack += 1;
        }
        if flags & flag_mask::FIN != 0 {
            self.fin += 1;
        }
        if flags & flag_mask::RST != 0 {
            self.rst += 1;
        }
        if flags & flag_mask::PSH != 0 {
            self.psh += 1;
        }
        if flags & flag_mask::URG != 0 {
            self.urg += 1;
        }
    }
}

const ENTROPY_SYMBOL_CAP: usize = 4096;

/// Per-flow, per-window aggregate (spec §3 "FlowAggregate"). Created lazily
/// on first event, destroyed after emission to the publisher.
#[derive(Debug, Clone)]
pub struct FlowAggregate {
    pub packets: u64,
    pub total_bytes: u64,
    pub flags: FlagCounts,
    pub packet_size: RunningMoments,
    pub packet_size_quantiles: QuantileSketch,
    pub inter_arrival: RunningMoments,
    pub first_seen_ns: i64,
    pub last_seen_ns: i64,
    pub src_ip_entropy: SymbolCounts,
    pub dst_ip_entropy: SymbolCounts,
    pub src_port_entropy: SymbolCounts,
    pub dst_port_entropy: SymbolCounts,
    pub transport: crate::cim::Transport,
    last_event_ns: Option<i64>,
}

impl FlowAggregate {
    pub fn new(first_record: &CimRecord) -> Self {
        let mut agg = Self {
            packets: 0,
            total_bytes: 0,
            flags: FlagCounts::default(),
            packet_size: RunningMoments::new(),
            packet_size_quantiles: QuantileSketch::new(),
            inter_arrival: RunningMoments::new(),
            first_seen_ns: first_record.event_time_ns,
            last_seen_ns: first_record.event_time_ns,
            src_ip_entropy: SymbolCounts::new(ENTROPY_SYMBOL_CAP),
            dst_ip_entropy: SymbolCounts::new(ENTROPY_SYMBOL_CAP),
            src_port_entropy: SymbolCounts::new(ENTROPY_SYMBOL_CAP),
            dst_port_entropy: SymbolCounts::new(ENTROPY_SYMBOL_CAP),
            transport: first_record.transport,
            last_event_ns: None,
        };
        agg.observe(first_record);
        agg
    }

    /// Folds one CIM record into this aggregate (spec §4.3).
    ///
    /// Counters are monotonically non-decreasing; negative inter-arrival
    /// time from clock skew is clipped to zero before updating moments
    /// (spec §4.3 "Tie-breaks and edge cases").
    pub fn observe(&mut self, record: &CimRecord) {
        self.packets += record.packets;
        self.total_bytes += record.bytes;
        self.flags.observe(record.tcp_flags);

        let size = record.bytes as f64;
        self.packet_size.observe(size);
        self.packet_size_quantiles.observe(size);

        if let Some(prev) = self.last_event_ns {
            let iat_ns = record.event_time_ns - prev;
            let iat_secs = (iat_ns.max(0) as f64) / 1_000_000_000.0;
            self.inter_arrival.observe(iat_secs);
        }
        self.last_event_ns = Some(record.event_time_ns);

        self.first_seen_ns = self.first_seen_ns.min(record.event_time_ns);
        self.last_seen_ns = self.last_seen_ns.max(record.event_time_ns);

        if let Some(ip) = record.src_ip {
            self.src_ip_entropy.observe(&ip_symbol(ip));
        }
        if let Some(ip) = record.dest_ip {
            self.dst_ip_entropy.observe(&ip_symbol(ip));
        }
        if let Some(p) = record.src_port {
            self.src_port_entropy.observe(&p.to_string());
        }
        if let Some(p) = record.dest_port {
            self.dst_port_entropy.observe(&p.to_string());
        }
    }

    pub fn duration_secs(&self) -> f64 {
        ((self.last_seen_ns - self.first_seen_ns).max(0) as f64) / 1_000_000_000.0
    }

    pub fn distinct_dest_ports(&self) -> usize {
        self.dst_port_entropy.distinct_count()
    }
}

fn ip_symbol(ip: IpAddr) -> String {
    ip.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cim::{Direction, SourceKind, Transport};
    use std::net::Ipv4Addr;

    fn record(ns: i64, bytes: u64, flags: u8) -> CimRecord {
        CimRecord {
            event_id: "evt_test".to_string(),
            event_time_ns: ns,
            source: SourceKind::Pcap,
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dest_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            src_port: Some(1234),
            dest_port: Some(80),
            transport: Transport::Tcp,
            bytes,
            packets: 1,
            direction: Direction::Internal,
            tcp_flags: flags,
            duration_secs: 0.0,
            is_internal: true,
            raw_hash: "h".to_string(),
        }
    }

    #[test]
    fn syn_without_ack_increments_syn_exactly_once() {
        let r = record(0, 40, flag_mask::SYN);
        let agg = FlowAggregate::new(&r);
        assert_eq!(agg.flags.syn, 1);
        assert_eq!(agg.flags.ack, 0);
    }

    #[test]
    fn counters_accumulate_across_events() {
        let r1 = record(0, 100, 0);
        let mut agg = FlowAggregate::new(&r1);
        let r2 = record(1_000_000_000, 200, 0);
        agg.observe(&r2);
        assert_eq!(agg.packets, 2);
        assert_eq!(agg.total_bytes, 300);
        assert!((agg.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn negative_iat_from_clock_skew_is_clipped_to_zero() {
        let r1 = record(1_000_000_000, 100, 0);
        let mut agg = FlowAggregate::new(&r1);
        let r2 = record(500_000_000, 100, 0); // earlier than r1: clock skew
        agg.observe(&r2);
        assert_eq!(agg.inter_arrival.min(), 0.0);
    }

    use proptest::prelude::*;

    proptest! {
        // Invariant 3: for a closed window, sum(packets) == packet_count and
        // sum(bytes) == total_bytes over the admitted events.
        #[test]
        fn sums_match_observed_totals(
            byte_sizes in prop::collection::vec(1u64..2000, 1..50),
            packet_counts in prop::collection::vec(1u64..20, 1..50),
        ) {
            let n = byte_sizes.len().min(packet_counts.len());
            let mut expected_packets = 0u64;
            let mut expected_bytes = 0u64;
            let mut agg: Option<FlowAggregate> = None;
            for i in 0..n {
                let mut r = record(i as i64 * 1_000_000_000, byte_sizes[i], 0);
                r.packets = packet_counts[i];
                expected_packets += r.packets;
                expected_bytes += r.bytes;
                match agg.as_mut() {
                    Some(a) => a.observe(&r),
                    None => agg = Some(FlowAggregate::new(&r)),
                }
            }
            let agg = agg.unwrap();
            prop_assert_eq!(agg.packets, expected_packets);
            prop_assert_eq!(agg.total_bytes, expected_bytes);
        }
    }
}
