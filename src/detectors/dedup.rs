//! Dedup cache for anomaly emissions (spec §4.4 "deduplicated via
//! `(type, subject, window_start)` key held in a short-TTL cache (60 min)").

use crate::detectors::AnomalyKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

const TTL: Duration = Duration::from_secs(60 * 60);

pub struct DedupCache {
    seen: Mutex<HashMap<(AnomalyKind, String, i64), Instant>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` the first time `(kind, subject, window_start)` is seen
    /// within the TTL window; `false` on every subsequent call until it
    /// expires. Opportunistically sweeps expired entries.
    pub fn should_emit(&self, kind: AnomalyKind, subject: &str, window_start: i64) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, inserted| now.duration_since(*inserted) < TTL);

        let key = (kind, subject.to_string(), window_start);
        if seen.contains_key(&key) {
            false
        } else {
            seen.insert(key, now);
            true
        }
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_call_with_same_key_is_suppressed() {
        let cache = DedupCache::new();
        assert!(cache.should_emit(AnomalyKind::SynFlood, "1.2.3.4", 0));
        assert!(!cache.should_emit(AnomalyKind::SynFlood, "1.2.3.4", 0));
    }

    #[test]
    fn different_window_start_is_independent() {
        let cache = DedupCache::new();
        assert!(cache.should_emit(AnomalyKind::SynFlood, "1.2.3.4", 0));
        assert!(cache.should_emit(AnomalyKind::SynFlood, "1.2.3.4", 60));
    }
}
