//! Rate spike detector: tumbling-1m window close only (spec §4.4).

use crate::detectors::{AnomalyEvent, AnomalyKind, Severity};
use crate::flow::{FlowAggregate, FlowKey, WindowDescriptor, WindowKind};

pub fn check(key: &FlowKey, window: &WindowDescriptor, agg: &FlowAggregate, threshold: u64) -> Option<AnomalyEvent> {
    if window.kind != WindowKind::Tumbling1m {
        return None;
    }
    let rate = agg.packets as f64 / 60.0;
    if rate <= threshold as f64 {
        return None;
    }
    let canonical = key.bidirectional();
    Some(AnomalyEvent {
        kind: AnomalyKind::RateSpike,
        subject: format!("{}:{}", canonical.src_ip, canonical.dest_ip),
        window_or_time_ns: window.start_ns,
        severity: Severity::Medium,
        evidence: serde_json::json!({
            "packets": agg.packets,
            "rate_per_sec": rate,
            "threshold": threshold,
        }),
        timestamp_ns: window.end_ns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cim::{Direction, SourceKind, Transport};
    use std::net::{IpAddr, Ipv4Addr};

    fn key() -> FlowKey {
        FlowKey {
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dest_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_port: 1000,
            dest_port: 80,
            transport: Transport::Tcp,
        }
    }

    fn window() -> WindowDescriptor {
        WindowDescriptor {
            kind: WindowKind::Tumbling1m,
            start_ns: 0,
            end_ns: 60_000_000_000,
        }
    }

    fn agg_with_packets(packets: u64) -> FlowAggregate {
        let record = crate::cim::CimRecord {
            event_id: "evt".to_string(),
            event_time_ns: 0,
            source: SourceKind::Pcap,
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dest_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            src_port: Some(1000),
            dest_port: Some(80),
            transport: Transport::Tcp,
            bytes: 100,
            packets,
            direction: Direction::Internal,
            tcp_flags: 0,
            duration_secs: 0.0,
            is_internal: true,
            raw_hash: "h".to_string(),
        };
        FlowAggregate::new(&record)
    }

    #[test]
    fn fires_only_above_threshold_on_tumbling_1m() {
        let agg = agg_with_packets(70_000);
        assert!(check(&key(), &window(), &agg, 1000).is_some());

        let non_tumbling = WindowDescriptor {
            kind: WindowKind::Tumbling5m,
            ..window()
        };
        assert!(check(&key(), &non_tumbling, &agg, 1000).is_none());
    }

    #[test]
    fn below_threshold_does_not_fire() {
        let agg = agg_with_packets(1);
        assert!(check(&key(), &window(), &agg, 1000).is_none());
    }

    #[test]
    fn subject_is_direction_agnostic() {
        let agg = agg_with_packets(70_000);
        let forward = check(&key(), &window(), &agg, 1000).unwrap();

        let reverse = FlowKey {
            src_ip: key().dest_ip,
            dest_ip: key().src_ip,
            src_port: key().dest_port,
            dest_port: key().src_port,
            transport: key().transport,
        };
        let backward = check(&reverse, &window(), &agg, 1000).unwrap();
        assert_eq!(forward.subject, backward.subject);
    }
}
