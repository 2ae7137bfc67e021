//! Hot stats KV: short-TTL, advisory-only counters for the `/stats`
//! surface (spec §4.7: "60 minute TTL per key; pipelined multi-op updates;
//! loss is advisory and never affects pipeline correctness").

use crate::cim::CimRecord;
use crate::detectors::AnomalyEvent;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

const STATS_TTL_NS: i64 = Duration::from_secs(60 * 60).as_nanos() as i64;
const MAX_RECENT_ALERTS: usize = 200;

#[derive(Debug, Clone, Default)]
struct EndpointCounters {
    last_seen_ns: i64,
    packets: u64,
    bytes: u64,
    protocol_counts: HashMap<String, u64>,
    direction_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub protocol_counts: HashMap<String, u64>,
    pub direction_counts: HashMap<String, u64>,
    pub last_seen_ns: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub kind: String,
    pub subject: String,
    pub severity: String,
    pub timestamp_ns: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub tracked_endpoints: usize,
    pub top_talkers: Vec<(String, EndpointSnapshot)>,
    pub recent_alerts: Vec<AlertSummary>,
}

/// Advisory counters keyed by IP. A single `observe` call updates both the
/// source and destination entries under one lock acquisition, mirroring a
/// pipelined multi-op write rather than two independent round trips.
pub struct HotStats {
    endpoints: Mutex<HashMap<String, EndpointCounters>>,
    recent_alerts: Mutex<VecDeque<AlertSummary>>,
}

impl HotStats {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            recent_alerts: Mutex::new(VecDeque::with_capacity(MAX_RECENT_ALERTS)),
        }
    }

    pub fn observe(&self, record: &CimRecord, now_ns: i64) {
        let protocol = record.transport.as_str();
        let direction = direction_label(record.direction);

        let mut endpoints = self.endpoints.lock();
        if let Some(ip) = record.src_ip {
            bump(&mut endpoints, ip.to_string(), record.packets, record.bytes, &protocol, direction, now_ns);
        }
        if let Some(ip) = record.dest_ip {
            bump(&mut endpoints, ip.to_string(), record.packets, record.bytes, &protocol, direction, now_ns);
        }
    }

    pub fn record_alert(&self, anomaly: &AnomalyEvent) {
        let mut alerts = self.recent_alerts.lock();
        if alerts.len() == MAX_RECENT_ALERTS {
            alerts.pop_front();
        }
        alerts.push_back(AlertSummary {
            kind: format!("{:?}", anomaly.kind),
            subject: anomaly.subject.clone(),
            severity: format!("{:?}", anomaly.severity),
            timestamp_ns: anomaly.timestamp_ns,
        });
    }

    /// Drops entries whose `last_seen_ns` is older than the 60 minute TTL.
    pub fn sweep_expired(&self, now_ns: i64) {
        self.endpoints.lock().retain(|_, c| now_ns - c.last_seen_ns < STATS_TTL_NS);
    }

    pub fn snapshot(&self, top_n: usize) -> StatsSnapshot {
        let endpoints = self.endpoints.lock();
        let mut top_talkers: Vec<(String, EndpointSnapshot)> = endpoints
            .iter()
            .map(|(ip, c)| {
                (
                    ip.clone(),
                    EndpointSnapshot {
                        packets: c.packets,
                        bytes: c.bytes,
                        protocol_counts: c.protocol_counts.clone(),
                        direction_counts: c.direction_counts.clone(),
                        last_seen_ns: c.last_seen_ns,
                    },
                )
            })
            .collect();
        top_talkers.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes));
        top_talkers.truncate(top_n);

        StatsSnapshot {
            tracked_endpoints: endpoints.len(),
            top_talkers,
            recent_alerts: self.recent_alerts.lock().iter().cloned().collect(),
        }
    }
}

impl Default for HotStats {
    fn default() -> Self {
        Self::new()
    }
}

fn direction_label(direction: crate::cim::Direction) -> &'static str {
    use crate::cim::Direction;
    match direction {
        Direction::Inbound => "inbound",
        Direction::Outbound => "outbound",
        Direction::Internal => "internal",
        Direction::External => "external",
    }
}

fn bump(
    endpoints: &mut HashMap<String, EndpointCounters>,
    key: String,
    packets: u64,
    bytes: u64,
    protocol: &str,
    direction: &'static str,
    now_ns: i64,
) {
    let entry = endpoints.entry(key).or_default();
    entry.packets += packets;
    entry.bytes += bytes;
    entry.last_seen_ns = now_ns;
    *entry.protocol_counts.entry(protocol.to_string()).or_insert(0) += 1;
    *entry.direction_counts.entry(direction.to_string()).or_insert(0) += 1;
}
