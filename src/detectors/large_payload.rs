//! Large payload detector: stateless, per event (spec §4.4).

use crate::cim::CimRecord;
use crate::detectors::{AnomalyEvent, AnomalyKind, Severity};

pub fn check(record: &CimRecord, threshold: u64) -> Option<AnomalyEvent> {
    if record.bytes < threshold {
        return None;
    }
    let subject = record.event_id.clone();
    Some(AnomalyEvent {
        kind: AnomalyKind::LargePayload,
        subject,
        window_or_time_ns: record.event_time_ns,
        severity: Severity::Low,
        evidence: serde_json::json!({ "bytes": record.bytes, "threshold": threshold }),
        timestamp_ns: record.event_time_ns,
    })
}
