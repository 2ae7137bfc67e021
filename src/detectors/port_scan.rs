//! Per-source-IP port scan tracking over a sliding 5 min window (spec §4.4).

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

const WINDOW_NS: i64 = 300_000_000_000;

pub struct PortScanTracker {
    recent: Mutex<HashMap<IpAddr, VecDeque<(i64, u16)>>>,
}

impl PortScanTracker {
    pub fn new() -> Self {
        Self {
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Records one `dest_port` contact and returns `(distinct_count,
    /// first_20_ports)` over the trailing 5 min window for `src_ip`.
    pub fn observe(&self, src_ip: IpAddr, dest_port: u16, event_time_ns: i64) -> Option<(usize, Vec<u16>)> {
        let mut recent = self.recent.lock();
        let entries = recent.entry(src_ip).or_insert_with(VecDeque::new);
        entries.push_back((event_time_ns, dest_port));
        while let Some(&(ts, _)) = entries.front() {
            if event_time_ns - ts > WINDOW_NS {
                entries.pop_front();
            } else {
                break;
            }
        }

        let mut seen = std::collections::HashSet::new();
        let mut first_ports = Vec::new();
        for &(_, port) in entries.iter() {
            if seen.insert(port) {
                if first_ports.len() < 20 {
                    first_ports.push(port);
                }
            }
        }
        Some((seen.len(), first_ports))
    }
}

impl Default for PortScanTracker {
    fn default() -> Self {
        Self::new()
    }
}
