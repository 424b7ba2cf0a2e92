//! Median time past and network-adjusted clock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use utxod_consensus::constants::MEDIAN_TIME_SPAN;

/// Median of the trailing block timestamps, in unix seconds.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MedianTimePast(pub i64);

impl MedianTimePast {
    pub fn seconds(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MedianTimePast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The last `MEDIAN_TIME_SPAN` timestamps ending at some block, oldest first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MedianTimeWindow {
    times: VecDeque<i64>,
}

impl MedianTimeWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a window from timestamps in chain order; only the newest span is kept.
    pub fn from_times(times: impl IntoIterator<Item = i64>) -> Self {
        let mut window = Self::new();
        for time in times {
            window.push(time);
        }
        window
    }

    pub fn push(&mut self, time: i64) {
        self.times.push_back(time);
        while self.times.len() > MEDIAN_TIME_SPAN {
            self.times.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn median(&self) -> Option<MedianTimePast> {
        if self.times.is_empty() {
            return None;
        }
        let mut times: Vec<i64> = self.times.iter().copied().collect();
        times.sort_unstable();
        Some(MedianTimePast(times[times.len() / 2]))
    }
}

pub trait NetworkTime: Send + Sync {
    /// Current time in unix seconds, adjusted by the peer offset.
    fn current_time(&self) -> i64;
}

/// Wall clock plus an offset learned from peers.
#[derive(Debug, Default)]
pub struct SystemNetworkTime {
    offset_seconds: AtomicI64,
}

impl SystemNetworkTime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offset(&self, seconds: i64) {
        self.offset_seconds.store(seconds, Ordering::Relaxed);
    }

    pub fn offset(&self) -> i64 {
        self.offset_seconds.load(Ordering::Relaxed)
    }
}

impl NetworkTime for SystemNetworkTime {
    fn current_time(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        i64::try_from(now)
            .unwrap_or(i64::MAX)
            .saturating_add(self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_partial_window() {
        assert_eq!(MedianTimeWindow::new().median(), None);
        let window = MedianTimeWindow::from_times([30, 10, 20]);
        assert_eq!(window.median(), Some(MedianTimePast(20)));
        // Even counts take the upper middle element.
        let window = MedianTimeWindow::from_times([40, 10, 30, 20]);
        assert_eq!(window.median(), Some(MedianTimePast(30)));
    }

    #[test]
    fn window_keeps_newest_span() {
        let window = MedianTimeWindow::from_times(0..20);
        assert_eq!(window.len(), MEDIAN_TIME_SPAN);
        assert_eq!(window.median(), Some(MedianTimePast(14)));
    }

    #[test]
    fn network_time_applies_offset() {
        let clock = SystemNetworkTime::new();
        let base = clock.current_time();
        clock.set_offset(3_600);
        assert!(clock.current_time() >= base + 3_600);
        assert_eq!(clock.offset(), 3_600);
    }
}
