//! Time-windowed ring of recent capture positions, one ring per color.
//!
//! Used by the map overview to flash recent action. Bounded by both a
//! fixed capacity and an age window, so the rings stay a constant-size
//! read regardless of capture rate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Entries kept per color.
pub const RING_CAPACITY: usize = 20;

/// Entries older than this are dropped on read.
pub const CAPTURE_WINDOW: Duration = Duration::from_secs(25);

#[derive(Debug, Clone, Copy)]
struct CaptureEntry {
    x: u16,
    y: u16,
    at: Instant,
}

/// Recent capture positions split by the captured piece's color.
pub struct RecentCaptures {
    white: Mutex<VecDeque<CaptureEntry>>,
    black: Mutex<VecDeque<CaptureEntry>>,
}

impl RecentCaptures {
    pub fn new() -> RecentCaptures {
        RecentCaptures {
            white: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            black: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
        }
    }

    fn ring(&self, white: bool) -> &Mutex<VecDeque<CaptureEntry>> {
        if white {
            &self.white
        } else {
            &self.black
        }
    }

    /// Records a capture; the oldest entry falls out at capacity.
    pub fn record(&self, x: u16, y: u16, was_white: bool) {
        let mut ring = self.ring(was_white).lock().unwrap();
        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(CaptureEntry {
            x,
            y,
            at: Instant::now(),
        });
    }

    /// Positions of captures of the given color inside the age window,
    /// oldest first.
    pub fn recent(&self, white: bool) -> Vec<(u16, u16)> {
        let now = Instant::now();
        self.ring(white)
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| now.duration_since(entry.at) <= CAPTURE_WINDOW)
            .map(|entry| (entry.x, entry.y))
            .collect()
    }
}

impl Default for RecentCaptures {
    fn default() -> RecentCaptures {
        RecentCaptures::new()
    }
}
