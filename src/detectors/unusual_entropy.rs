//! Unusual entropy detector: tumbling-5m window close, EWMA baseline per
//! subject (spec §4.4 "rolling baseline (EWMA with α=0.1)").

use crate::detectors::{AnomalyEvent, AnomalyKind, Severity};
use crate::flow::{FlowAggregate, FlowKey, WindowDescriptor, WindowKind};
use parking_lot::Mutex;
use std::collections::HashMap;

const ALPHA: f64 = 0.1;
const MIN_STD: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Default)]
struct Ewma {
    mean: f64,
    variance: f64,
    initialized: bool,
}

impl Ewma {
    fn update(&mut self, value: f64) -> (f64, f64) {
        if !self.initialized {
            self.mean = value;
            self.variance = 0.0;
            self.initialized = true;
            return (self.mean, self.variance.sqrt().max(MIN_STD));
        }
        let prev_mean = self.mean;
        self.mean = ALPHA * value + (1.0 - ALPHA) * prev_mean;
        let diff = value - prev_mean;
        self.variance = (1.0 - ALPHA) * (self.variance + ALPHA * diff * diff);
        (prev_mean, self.variance.sqrt().max(MIN_STD))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SubjectBaseline {
    dst_ip: Ewma,
    dst_port: Ewma,
}

pub struct EntropyBaselines {
    baselines: Mutex<HashMap<String, SubjectBaseline>>,
}

impl EntropyBaselines {
    pub fn new() -> Self {
        Self {
            baselines: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(
        &self,
        key: &FlowKey,
        window: &WindowDescriptor,
        agg: &FlowAggregate,
        z_threshold: f64,
    ) -> Option<AnomalyEvent> {
        if window.kind != WindowKind::Tumbling5m {
            return None;
        }

        let subject = key.src_ip.to_string();
        let dst_ip_entropy = agg.dst_ip_entropy.shannon_entropy();
        let dst_port_entropy = agg.dst_port_entropy.shannon_entropy();

        let mut baselines = self.baselines.lock();
        let baseline = baselines.entry(subject.clone()).or_default();
        let (ip_mean, ip_std) = baseline.dst_ip.update(dst_ip_entropy);
        let (port_mean, port_std) = baseline.dst_port.update(dst_port_entropy);

        let ip_z = (dst_ip_entropy - ip_mean) / ip_std;
        let port_z = (dst_port_entropy - port_mean) / port_std;

        if ip_z.abs() <= z_threshold && port_z.abs() <= z_threshold {
            return None;
        }

        Some(AnomalyEvent {
            kind: AnomalyKind::UnusualEntropy,
            subject,
            window_or_time_ns: window.start_ns,
            severity: Severity::Medium,
            evidence: serde_json::json!({
                "dst_ip_entropy": dst_ip_entropy,
                "dst_ip_zscore": ip_z,
                "dst_port_entropy": dst_port_entropy,
                "dst_port_zscore": port_z,
                "threshold": z_threshold,
            }),
            timestamp_ns: window.end_ns,
        })
    }
}

impl Default for EntropyBaselines {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cim::{CimRecord, Direction, SourceKind, Transport};
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
            kind: WindowKind::Tumbling5m,
            start_ns: 0,
            end_ns: 300_000_000_000,
        }
    }

    fn agg() -> FlowAggregate {
        let record = CimRecord {
            event_id: "evt".to_string(),
            event_time_ns: 0,
            source: SourceKind::Pcap,
            src_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            dest_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            src_port: Some(1000),
            dest_port: Some(80),
            transport: Transport::Tcp,
            bytes: 100,
            packets: 1,
            direction: Direction::Internal,
            tcp_flags: 0,
            duration_secs: 0.0,
            is_internal: true,
            raw_hash: "h".to_string(),
        };
        FlowAggregate::new(&record)
    }

    #[test]
    fn first_observation_never_fires_regardless_of_value() {
        let baselines = EntropyBaselines::new();
        assert!(baselines.check(&key(), &window(), &agg(), 3.0).is_none());
    }

    #[test]
    fn wrong_window_kind_never_fires() {
        let baselines = EntropyBaselines::new();
        let non_5m = WindowDescriptor {
            kind: WindowKind::Tumbling1m,
            ..window()
        };
        assert!(baselines.check(&key(), &non_5m, &agg(), 3.0).is_none());
    }
}
