//! Anomaly detectors: streaming heuristics fed by individual events and by
//! per-window flow aggregates (spec §4.4).

mod dedup;
mod large_payload;
mod port_scan;
mod rate_spike;
mod syn_flood;
mod unusual_entropy;

use crate::cim::CimRecord;
use crate::config::ThresholdConfig;
use crate::flow::{FlowAggregate, FlowKey, WindowDescriptor};
use dedup::DedupCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SynFlood,
    PortScan,
    LargePayload,
    RateSpike,
    UnusualEntropy,
}

/// One detected anomaly (spec §3 "AnomalyEvent"). `evidence` carries the
/// reproducible numeric fields the threshold comparison was made against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub kind: AnomalyKind,
    pub subject: String,
    pub window_or_time_ns: i64,
    pub severity: Severity,
    pub evidence: Value,
    pub timestamp_ns: i64,
}

/// Owns every detector's running state and the cross-detector dedup cache.
/// Single instance shared across the pipeline; individual trackers
/// internally shard by subject key.
pub struct DetectorEngine {
    thresholds: ThresholdConfig,
    syn_flood: syn_flood::SynFloodTracker,
    port_scan: port_scan::PortScanTracker,
    entropy: unusual_entropy::EntropyBaselines,
    dedup: DedupCache,
}

impl DetectorEngine {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            syn_flood: syn_flood::SynFloodTracker::new(),
            port_scan: port_scan::PortScanTracker::new(),
            entropy: unusual_entropy::EntropyBaselines::new(),
            dedup: DedupCache::new(),
        }
    }

    /// Invoked inline after each admitted event (spec §4.4 "invoked inline
    /// after each event insert"): SYN flood, port scan, and large payload.
    pub fn on_event(&self, record: &CimRecord) -> Vec<AnomalyEvent> {
        let mut out = Vec::new();

        if let Some(src_ip) = record.src_ip {
            if let Some(syn_count) = self.syn_flood.observe(src_ip, record.transport, record.tcp_flags, record.event_time_ns) {
                if syn_count as u64 >= self.thresholds.syn_flood {
                    let subject = src_ip.to_string();
                    let window_start = record.event_time_ns - (record.event_time_ns % 60_000_000_000);
                    if self.dedup.should_emit(AnomalyKind::SynFlood, &subject, window_start) {
                        out.push(AnomalyEvent {
                            kind: AnomalyKind::SynFlood,
                            subject: subject.clone(),
                            window_or_time_ns: window_start,
                            severity: Severity::High,
                            evidence: serde_json::json!({ "source_ip": subject, "syn_count": syn_count }),
                            timestamp_ns: record.event_time_ns,
                        });
                    }
                }
            }

            if let Some(dest_port) = record.dest_port {
                if let Some((count, first_ports)) = self.port_scan.observe(src_ip, dest_port, record.event_time_ns) {
                    if count >= self.thresholds.port_scan {
                        let subject = src_ip.to_string();
                        let window_start = record.event_time_ns - (record.event_time_ns % 300_000_000_000);
                        if self.dedup.should_emit(AnomalyKind::PortScan, &subject, window_start) {
                            out.push(AnomalyEvent {
                                kind: AnomalyKind::PortScan,
                                subject: subject.clone(),
                                window_or_time_ns: window_start,
                                severity: Severity::Medium,
                                evidence: serde_json::json!({
                                    "source_ip": subject,
                                    "unique_ports_scanned": count,
                                    "first_ports": first_ports,
                                }),
                                timestamp_ns: record.event_time_ns,
                            });
                        }
                    }
                }
            }
        }

        if let Some(ev) = large_payload::check(record, self.thresholds.large_payload) {
            out.push(ev);
        }

        out
    }

    /// Invoked at each window close (spec §4.4 "and at each window close"):
    /// rate spike on tumbling-1m, unusual entropy on tumbling-5m.
    pub fn on_window_close(&self, key: &FlowKey, window: &WindowDescriptor, agg: &FlowAggregate) -> Vec<AnomalyEvent> {
        let mut out = Vec::new();

        if let Some(ev) = rate_spike::check(key, window, agg, self.thresholds.rate_spike) {
            let subject = ev.subject.clone();
            if self.dedup.should_emit(AnomalyKind::RateSpike, &subject, window.start_ns) {
                out.push(ev);
            }
        }

        if let Some(ev) = self.entropy.check(key, window, agg, self.thresholds.entropy_zscore) {
            let subject = ev.subject.clone();
            if self.dedup.should_emit(AnomalyKind::UnusualEntropy, &subject, window.start_ns) {
                out.push(ev);
            }
        }

        out
    }
}
