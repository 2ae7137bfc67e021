//! Stream processor: window assignment, watermark tracking, and the window
//! close sweep that emits `FeatureVector`s (spec §2.4, §4.3).

use crate::cim::CimRecord;
use crate::config::Config;
use crate::flow::aggregate::FlowAggregate;
use crate::flow::key::FlowKey;
use crate::flow::store::FlowStateStore;
use crate::flow::window::{assign_windows, WindowDescriptor, WindowKind, Watermark};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-source watermarks (spec §4.3 "A per-source watermark W").
pub struct WatermarkTable {
    watermarks: Mutex<HashMap<String, Watermark>>,
}

impl WatermarkTable {
    pub fn new() -> Self {
        Self {
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    pub fn advance(&self, source_key: &str, event_time_ns: i64) -> i64 {
        let mut table = self.watermarks.lock();
        let wm = table.entry(source_key.to_string()).or_insert_with(Watermark::new);
        wm.advance(event_time_ns);
        wm.value()
    }

    pub fn is_late(&self, source_key: &str, event_time_ns: i64, lateness_ns: i64) -> bool {
        let table = self.watermarks.lock();
        table
            .get(source_key)
            .map(|wm| wm.is_late(event_time_ns, lateness_ns))
            .unwrap_or(false)
    }

    pub fn current(&self, source_key: &str) -> Option<i64> {
        self.watermarks.lock().get(source_key).map(|wm| wm.value())
    }

    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.watermarks
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.value()))
            .collect()
    }
}

impl Default for WatermarkTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks each flow's open session window (spec §3 "Session window": closes
/// after `session_gap_secs` of inactivity, otherwise keeps extending).
/// Unlike `assign_windows`, this is stateful per `FlowKey` since a session's
/// boundary depends on the gap since that flow's last event.
pub struct SessionTracker {
    open: Mutex<HashMap<FlowKey, WindowDescriptor>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session window `key` belongs to at `event_time_ns`, and
    /// the prior window it replaces if the session was extended rather than
    /// started fresh. The gap is measured against the *provisional* end of
    /// the open session (its last event time plus the gap), so consecutive
    /// events within `gap_ns` of each other keep extending the same session.
    pub fn assign(&self, key: FlowKey, event_time_ns: i64, gap_ns: i64) -> (WindowDescriptor, Option<WindowDescriptor>) {
        let mut open = self.open.lock();
        let new_end = event_time_ns + gap_ns;
        match open.get(&key).copied() {
            Some(prev) if event_time_ns <= prev.end_ns => {
                let extended = WindowDescriptor {
                    kind: WindowKind::Session,
                    start_ns: prev.start_ns,
                    end_ns: new_end,
                };
                open.insert(key, extended);
                (extended, Some(prev))
            }
            _ => {
                let started = WindowDescriptor {
                    kind: WindowKind::Session,
                    start_ns: event_time_ns,
                    end_ns: new_end,
                };
                open.insert(key, started);
                (started, None)
            }
        }
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct ProcessorCounters {
    pub late_dropped: AtomicU64,
    pub windows_emitted: AtomicU64,
}

/// One closed (flow, window) ready for feature extraction and emission.
pub struct ClosedWindow {
    pub key: FlowKey,
    pub window: WindowDescriptor,
    pub aggregate: FlowAggregate,
}

pub struct StreamProcessor {
    store: FlowStateStore,
    watermarks: WatermarkTable,
    sessions: SessionTracker,
    config: Config,
    pub counters: ProcessorCounters,
}

impl StreamProcessor {
    pub fn new(config: Config) -> Self {
        let store = FlowStateStore::new(config.shard_count);
        Self {
            store,
            watermarks: WatermarkTable::new(),
            sessions: SessionTracker::new(),
            config,
            counters: ProcessorCounters::default(),
        }
    }

    pub fn store(&self) -> &FlowStateStore {
        &self.store
    }

    pub fn watermarks(&self) -> &WatermarkTable {
        &self.watermarks
    }

    /// Admits one CIM record: advances the watermark, drops it if late,
    /// otherwise assigns it to every applicable window and folds it into
    /// the flow aggregate for each (spec §4.3).
    pub fn admit(&self, source_key: &str, record: &CimRecord, is_flow_record_source: bool) -> bool {
        let lateness_ns = self.config.lateness_for(is_flow_record_source).as_nanos() as i64;
        let watermark_before = self.watermarks.current(source_key).unwrap_or(i64::MIN);
        if record.event_time_ns < watermark_before - lateness_ns {
            self.counters.late_dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("sentinel_late_dropped_total").increment(1);
            return false;
        }
        self.watermarks.advance(source_key, record.event_time_ns);

        let key = FlowKey::from_record(record);
        for window in assign_windows(record.event_time_ns, &self.config.windows) {
            self.store.observe(key, window, record);
        }

        let gap_ns = self.config.windows.session_gap_secs as i64 * 1_000_000_000;
        let (session_window, prior_session) = self.sessions.assign(key, record.event_time_ns, gap_ns);
        if let Some(prior) = prior_session {
            self.store.rekey(key, prior, session_window);
        }
        self.store.observe(key, session_window, record);
        true
    }

    /// Sweeps every open (flow, window) whose window has closed per the
    /// current watermark for `source_key`, removing and returning them
    /// (spec §4.3 step 1 and 4: "Acquire shard lock ... Remove aggregate").
    ///
    /// Empty flows (`packet_count = 0`) are never created by `admit`, so no
    /// extra filtering is needed here (spec §4.3 "Empty flow ... skip
    /// emission").
    pub fn sweep_closed(&self, source_key: &str, is_flow_record_source: bool) -> Vec<ClosedWindow> {
        let lateness_ns = self.config.lateness_for(is_flow_record_source).as_nanos() as i64;
        let watermark = match self.watermarks.current(source_key) {
            Some(w) => w,
            None => return Vec::new(),
        };

        let closed_keys = self.store.keys_with_window(|w| watermark > w.closes_at(lateness_ns));

        let mut out = Vec::with_capacity(closed_keys.len());
        for (key, window) in closed_keys {
            if let Some(agg) = self.store.take(key, window) {
                if agg.packets == 0 {
                    continue;
                }
                self.counters.windows_emitted.fetch_add(1, Ordering::Relaxed);
                out.push(ClosedWindow {
                    key,
                    window,
                    aggregate: agg,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cim::{Direction, SourceKind, Transport};
    use std::net::{IpAddr, Ipv4Addr};

    fn record(ns: i64) -> CimRecord {
        CimRecord {
            event_id: "evt".to_string(),
            event_time_ns: ns,
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
        }
    }

    #[test]
    fn late_event_is_dropped_and_counted() {
        let processor = StreamProcessor::new(Config::default());
        assert!(processor.admit("src", &record(100_000_000_000), false));
        // Far enough in the past to exceed the 5s network lateness tolerance.
        assert!(!processor.admit("src", &record(1_000_000_000), false));
        assert_eq!(processor.counters.late_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn window_closes_once_watermark_passes_end_plus_lateness() {
        let processor = StreamProcessor::new(Config::default());
        processor.admit("src", &record(0), false);
        assert!(processor.sweep_closed("src", false).is_empty());
        // Push the watermark well past window end + lateness.
        processor.admit("src", &record(120_000_000_000), false);
        let closed = processor.sweep_closed("src", false);
        assert!(!closed.is_empty());
    }

    #[test]
    fn session_extends_while_gap_stays_within_threshold() {
        let key = FlowKey::from_record(&record(0));
        let tracker = SessionTracker::new();
        let gap_ns = 300 * 1_000_000_000;

        let (first, prior) = tracker.assign(key, 0, gap_ns);
        assert!(prior.is_none());

        let (second, prior) = tracker.assign(key, 100 * 1_000_000_000, gap_ns);
        assert_eq!(prior, Some(first));
        assert_eq!(second.start_ns, first.start_ns);
        assert!(second.end_ns > first.end_ns);
    }

    #[test]
    fn session_starts_fresh_once_gap_exceeds_threshold() {
        let key = FlowKey::from_record(&record(0));
        let tracker = SessionTracker::new();
        let gap_ns = 300 * 1_000_000_000;

        let (first, _) = tracker.assign(key, 0, gap_ns);
        let (second, prior) = tracker.assign(key, first.end_ns + 1, gap_ns);
        assert!(prior.is_none());
        assert_eq!(second.start_ns, first.end_ns + 1);
    }

    #[test]
    fn admitting_within_session_gap_keeps_one_open_session_aggregate() {
        let processor = StreamProcessor::new(Config::default());
        let key = FlowKey::from_record(&record(0));
        processor.admit("src", &record(0), false);
        processor.admit("src", &record(10_000_000_000), false);

        let sessions = processor.store.keys_with_window(|w| w.kind == WindowKind::Session);
        assert_eq!(sessions.len(), 1);
        let agg = processor.store.peek(key, sessions[0].1).unwrap();
        assert_eq!(agg.packets, 2);
    }
}
