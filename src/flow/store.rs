//! Sharded flow state store (spec §4.3, §5).
//!
//! Each shard is protected by one `parking_lot::Mutex`, matching the
//! teacher's preference for `parking_lot` over `std::sync` / `tokio::sync`
//! for short critical sections (see `polymarket_book_store.rs`). All reads
//! and writes for one `FlowKey` land in the same shard, selected by a hash
//! of the key so unrelated flows never contend.

use crate::cim::CimRecord;
use crate::flow::aggregate::FlowAggregate;
use crate::flow::key::FlowKey;
use crate::flow::window::WindowDescriptor;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

pub type FlowWindowKey = (FlowKey, WindowDescriptor);

struct Shard {
    aggregates: HashMap<FlowWindowKey, FlowAggregate>,
}

/// Owns every `FlowAggregate`; windows only ever hold references to keys,
/// never the aggregates themselves (spec §3 "Ownership").
pub struct FlowStateStore {
    shards: Vec<Mutex<Shard>>,
}

impl FlowStateStore {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1).next_power_of_two();
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(Shard {
                    aggregates: HashMap::new(),
                })
            })
            .collect();
        Self { shards }
    }

    fn shard_index(&self, key: &FlowKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.shards.len() - 1)
    }

    /// Folds `record` into the aggregate for `(key, window)`, creating it
    /// lazily on first observation (spec §3 "created lazily on first event").
    pub fn observe(&self, key: FlowKey, window: WindowDescriptor, record: &CimRecord) {
        let idx = self.shard_index(&key);
        let mut shard = self.shards[idx].lock();
        shard
            .aggregates
            .entry((key, window))
            .and_modify(|agg| agg.observe(record))
            .or_insert_with(|| FlowAggregate::new(record));
    }

    /// Removes and returns the aggregate for `(key, window)`, if present.
    /// Called when a tumbling window closes (spec §4.3 step 4).
    pub fn take(&self, key: FlowKey, window: WindowDescriptor) -> Option<FlowAggregate> {
        let idx = self.shard_index(&key);
        let mut shard = self.shards[idx].lock();
        shard.aggregates.remove(&(key, window))
    }

    /// Moves the aggregate stored under `old` to `new`, preserving its
    /// contents. Used when a session window's provisional end extends on
    /// every new event, which changes its map key without starting a fresh
    /// aggregate (spec §3 "Session window").
    pub fn rekey(&self, key: FlowKey, old: WindowDescriptor, new: WindowDescriptor) {
        if old == new {
            return;
        }
        let idx = self.shard_index(&key);
        let mut shard = self.shards[idx].lock();
        if let Some(agg) = shard.aggregates.remove(&(key, old)) {
            shard.aggregates.insert((key, new), agg);
        }
    }

    /// Returns a snapshot clone without removing it — used by sliding
    /// windows, which keep independent per-window-instance state (spec
    /// §4.3 "Sliding windows keep aggregate across overlapping window
    /// instances via independent per-window state").
    pub fn peek(&self, key: FlowKey, window: WindowDescriptor) -> Option<FlowAggregate> {
        let idx = self.shard_index(&key);
        let shard = self.shards[idx].lock();
        shard.aggregates.get(&(key, window)).cloned()
    }

    /// Lists every `(FlowKey, WindowDescriptor)` pair whose window has
    /// closed per the watermark, for the stream processor's close sweep.
    /// Shards are scanned in parallel since they're independently locked and
    /// the sweep runs over the whole store on every tick (spec §4.3 step 1).
    pub fn keys_with_window<F>(&self, predicate: F) -> Vec<FlowWindowKey>
    where
        F: Fn(&WindowDescriptor) -> bool + Sync,
    {
        self.shards
            .par_iter()
            .flat_map(|shard| {
                let shard = shard.lock();
                shard.aggregates.keys().filter(|k| predicate(&k.1)).copied().collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn len(&self) -> usize {
        self.shards.par_iter().map(|s| s.lock().aggregates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cim::{Direction, SourceKind, Transport};
    use crate::flow::window::WindowKind;
    use std::net::{IpAddr, Ipv4Addr};

    fn record() -> CimRecord {
        CimRecord {
            event_id: "evt_1".to_string(),
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
        }
    }

    #[test]
    fn observe_creates_then_accumulates() {
        let store = FlowStateStore::new(4);
        let key = FlowKey::from_record(&record());
        let window = WindowDescriptor {
            kind: WindowKind::Tumbling1m,
            start_ns: 0,
            end_ns: 60_000_000_000,
        };
        store.observe(key, window, &record());
        store.observe(key, window, &record());
        let agg = store.peek(key, window).unwrap();
        assert_eq!(agg.packets, 2);
    }

    #[test]
    fn take_removes_aggregate() {
        let store = FlowStateStore::new(4);
        let key = FlowKey::from_record(&record());
        let window = WindowDescriptor {
            kind: WindowKind::Tumbling1m,
            start_ns: 0,
            end_ns: 60_000_000_000,
        };
        store.observe(key, window, &record());
        assert!(store.take(key, window).is_some());
        assert!(store.peek(key, window).is_none());
    }

    #[test]
    fn shard_count_is_power_of_two() {
        let store = FlowStateStore::new(5);
        assert!(store.shard_count().is_power_of_two());
        assert!(store.shard_count() >= 5);
    }
}
