//! Window assignment and the per-source watermark (spec §3 "WindowDescriptor",
//! §4.3 "Windowing").

use crate::config::WindowConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Tumbling1m,
    Tumbling5m,
    Tumbling15m,
    Sliding5m1m,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowDescriptor {
    pub kind: WindowKind,
    pub start_ns: i64,
    pub end_ns: i64,
}

impl WindowDescriptor {
    pub fn closes_at(&self, lateness_ns: i64) -> i64 {
        self.end_ns + lateness_ns
    }
}

/// Assigns an event to the tumbling windows (1/5/15 min) and the sliding
/// window instances it falls into (5 min window / 1 min slide), event-time
/// aligned (spec §4.3, §3).
///
/// `WindowKind::Session` is not produced here: unlike the other kinds, a
/// session window's boundaries depend on the gap since the same flow's last
/// event, not on `event_time_ns` alone. It is assigned statefully by
/// `processor::SessionTracker`, which holds that per-flow-key history.
pub fn assign_windows(event_time_ns: i64, cfg: &WindowConfig) -> Vec<WindowDescriptor> {
    let mut windows = Vec::with_capacity(1 + 1 + 1 + 5);

    let tumbling_kinds = [
        (WindowKind::Tumbling1m, cfg.tumbling_secs[0]),
        (WindowKind::Tumbling5m, cfg.tumbling_secs[1]),
        (WindowKind::Tumbling15m, cfg.tumbling_secs[2]),
    ];
    for (kind, secs) in tumbling_kinds {
        let size_ns = secs as i64 * 1_000_000_000;
        let start = (event_time_ns.div_euclid(size_ns)) * size_ns;
        windows.push(WindowDescriptor {
            kind,
            start_ns: start,
            end_ns: start + size_ns,
        });
    }

    let window_ns = cfg.sliding_window_secs as i64 * 1_000_000_000;
    let slide_ns = cfg.sliding_slide_secs as i64 * 1_000_000_000;
    if slide_ns > 0 {
        // Every sliding instance whose [start, start+window) contains event_time.
        let last_slide_start = (event_time_ns.div_euclid(slide_ns)) * slide_ns;
        let mut slide_start = last_slide_start - window_ns + slide_ns;
        while slide_start <= last_slide_start {
            if event_time_ns >= slide_start && event_time_ns < slide_start + window_ns {
                windows.push(WindowDescriptor {
                    kind: WindowKind::Sliding5m1m,
                    start_ns: slide_start,
                    end_ns: slide_start + window_ns,
                });
            }
            slide_start += slide_ns;
        }
    }

    windows
}

/// Tracks the minimum of recent event times per source, advancing
/// monotonically (spec §4.3 "A per-source watermark W").
#[derive(Debug, Clone, Copy)]
pub struct Watermark {
    value_ns: i64,
}

impl Watermark {
    pub fn new() -> Self {
        Self { value_ns: i64::MIN }
    }

    pub fn value(&self) -> i64 {
        self.value_ns
    }

    /// Advances the watermark given a newly observed event time. Watermarks
    /// never regress.
    pub fn advance(&mut self, event_time_ns: i64) {
        if event_time_ns > self.value_ns {
            self.value_ns = event_time_ns;
        }
    }

    /// Whether an event at `event_time_ns` is late given `lateness_ns`
    /// (spec §4.3: "Events with event_time < W - lateness are dropped").
    pub fn is_late(&self, event_time_ns: i64, lateness_ns: i64) -> bool {
        event_time_ns < self.value_ns - lateness_ns
    }

    /// Whether a window has closed: `W > window.end + lateness`.
    pub fn window_closed(&self, window: &WindowDescriptor, lateness_ns: i64) -> bool {
        self.value_ns > window.closes_at(lateness_ns)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}
