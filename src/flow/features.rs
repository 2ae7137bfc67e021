//! `FeatureVector`: derived from a `FlowAggregate` at window close (spec §3,
//! §4.3 step 2).

use crate::cim::Transport;
use crate::flow::aggregate::FlowAggregate;
use serde::{Deserialize, Serialize};

/// 16-32 named floats describing one (flow, window) pair. NaN/Inf are
/// replaced with 0 before emission (spec §3 "FeatureVector" invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub packet_size_mean: f64,
    pub packet_size_std: f64,
    pub packet_size_min: f64,
    pub packet_size_max: f64,
    pub packet_size_q25: f64,
    pub packet_size_q50: f64,
    pub packet_size_q75: f64,

    pub iat_mean: f64,
    pub iat_std: f64,
    pub iat_min: f64,
    pub iat_max: f64,

    pub byte_rate: f64,
    pub packet_rate: f64,

    pub src_ip_entropy: f64,
    pub dst_ip_entropy: f64,
    pub src_port_entropy: f64,
    pub dst_port_entropy: f64,

    pub syn_ratio: f64,
    pub ack_ratio: f64,
    pub fin_ratio: f64,
    pub rst_ratio: f64,

    pub fan_in_ports: f64,
    pub fan_out_hosts: f64,

    pub tcp_ratio: f64,
    pub udp_ratio: f64,
    pub icmp_ratio: f64,

    pub packet_count: f64,
    pub total_bytes: f64,
    pub duration_secs: f64,
}

/// Computes the feature vector for a closed window's aggregate (spec §4.3
/// step 2: mean/std/min/max/q25/q50/q75 of packet size; mean/std/min/max of
/// IAT; byte_rate/packet_rate; Shannon entropies; flag ratios).
///
/// Empty flows (`packet_count = 0`) should be filtered out by the caller
/// before emission (spec §4.3 "Tie-breaks and edge cases").
pub fn compute_feature_vector(agg: &FlowAggregate) -> FeatureVector {
    let duration = agg.duration_secs();
    let packets = agg.packets as f64;

    let byte_rate = if duration > 0.0 {
        agg.total_bytes as f64 / duration
    } else {
        0.0
    };
    let packet_rate = if duration > 0.0 { packets / duration } else { 0.0 };

    let is_tcp = matches!(agg.transport, Transport::Tcp);
    let flag_denom = if packets > 0.0 { packets } else { 1.0 };
    let (syn_ratio, ack_ratio, fin_ratio, rst_ratio) = if is_tcp {
        (
            agg.flags.syn as f64 / flag_denom,
            agg.flags.ack as f64 / flag_denom,
            agg.flags.fin as f64 / flag_denom,
            agg.flags.rst as f64 / flag_denom,
        )
    } else {
        (0.0, 0.0, 0.0, 0.0)
    };

    let (tcp_ratio, udp_ratio, icmp_ratio) = match agg.transport {
        Transport::Tcp => (1.0, 0.0, 0.0),
        Transport::Udp => (0.0, 1.0, 0.0),
        Transport::Icmp | Transport::Icmpv6 => (0.0, 0.0, 1.0),
        _ => (0.0, 0.0, 0.0),
    };

    let fv = FeatureVector {
        packet_size_mean: agg.packet_size.mean(),
        packet_size_std: agg.packet_size.std_dev(),
        packet_size_min: agg.packet_size.min(),
        packet_size_max: agg.packet_size.max(),
        packet_size_q25: agg.packet_size_quantiles.q25(),
        packet_size_q50: agg.packet_size_quantiles.q50(),
        packet_size_q75: agg.packet_size_quantiles.q75(),

        iat_mean: agg.inter_arrival.mean(),
        iat_std: agg.inter_arrival.std_dev(),
        iat_min: agg.inter_arrival.min(),
        iat_max: agg.inter_arrival.max(),

        byte_rate,
        packet_rate,

        src_ip_entropy: agg.src_ip_entropy.shannon_entropy(),
        dst_ip_entropy: agg.dst_ip_entropy.shannon_entropy(),
        src_port_entropy: agg.src_port_entropy.shannon_entropy(),
        dst_port_entropy: agg.dst_port_entropy.shannon_entropy(),

        syn_ratio,
        ack_ratio,
        fin_ratio,
        rst_ratio,

        fan_in_ports: agg.dst_port_entropy.distinct_count() as f64,
        fan_out_hosts: agg.dst_ip_entropy.distinct_count() as f64,

        tcp_ratio,
        udp_ratio,
        icmp_ratio,

        packet_count: packets,
        total_bytes: agg.total_bytes as f64,
        duration_secs: duration,
    };

    sanitize(fv)
}

fn sanitize(mut fv: FeatureVector) -> FeatureVector {
    macro_rules! clean {
        ($($field:ident),*) => {
            $(if !fv.$field.is_finite() { fv.$field = 0.0; })*
        };
    }
    clean!(
        packet_size_mean,
        packet_size_std,
        packet_size_min,
        packet_size_max,
        packet_size_q25,
        packet_size_q50,
        packet_size_q75,
        iat_mean,
        iat_std,
        iat_min,
        iat_max,
        byte_rate,
        packet_rate,
        src_ip_entropy,
        dst_ip_entropy,
        src_port_entropy,
        dst_port_entropy,
        syn_ratio,
        ack_ratio,
        fin_ratio,
        rst_ratio,
        fan_in_ports,
        fan_out_hosts,
        tcp_ratio,
        udp_ratio,
        icmp_ratio,
        packet_count,
        total_bytes,
        duration_secs
    );
    fv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cim::{Direction, SourceKind};
    use std::net::{IpAddr, Ipv4Addr};

    fn record(ns: i64, bytes: u64) -> crate::cim::CimRecord {
        crate::cim::CimRecord {
            event_id: "evt".to_string(),
            event_time_ns: ns,
            source: SourceKind::Pcap,
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dest_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            src_port: Some(1000),
            dest_port: Some(80),
            transport: Transport::Tcp,
            bytes,
            packets: 1,
            direction: Direction::Internal,
            tcp_flags: 0,
            duration_secs: 0.0,
            is_internal: true,
            raw_hash: "h".to_string(),
        }
    }

    #[test]
    fn byte_rate_equals_total_bytes_over_duration() {
        let r1 = record(0, 1000);
        let mut agg = FlowAggregate::new(&r1);
        agg.observe(&record(2_000_000_000, 1000));
        let fv = compute_feature_vector(&agg);
        assert!((fv.byte_rate - (2000.0 / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn zero_duration_yields_zero_rates_not_nan() {
        let r1 = record(0, 1000);
        let agg = FlowAggregate::new(&r1);
        let fv = compute_feature_vector(&agg);
        assert_eq!(fv.byte_rate, 0.0);
        assert_eq!(fv.packet_rate, 0.0);
        assert!(fv.byte_rate.is_finite());
    }

    use proptest::prelude::*;

    proptest! {
        // Invariant 4: for non-empty windows with duration > 0, byte_rate ==
        // total_bytes / duration within 1e-6.
        #[test]
        fn byte_rate_matches_total_bytes_over_duration(
            first_bytes in 1u64..100_000,
            second_bytes in 1u64..100_000,
            span_secs in 1i64..3600,
        ) {
            let r1 = record(0, first_bytes);
            let mut agg = FlowAggregate::new(&r1);
            agg.observe(&record(span_secs * 1_000_000_000, second_bytes));
            let fv = compute_feature_vector(&agg);
            let expected = (first_bytes + second_bytes) as f64 / span_secs as f64;
            prop_assert!((fv.byte_rate - expected).abs() < 1e-6);
        }
    }
}
