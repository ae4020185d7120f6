//! Fixed-capacity health-sample history
//!
//! A circular buffer of the most recent health-check outcomes per service,
//! ordered oldest to newest.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Outcome of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Check passed
    Ok,
    /// Check failed
    Error,
}

/// One health-check sample
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    /// When the check completed
    pub timestamp: DateTime<Utc>,
    /// Pass/fail
    pub status: HealthStatus,
    /// How long the check took
    pub latency: Duration,
    /// Error message when the check failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthSample {
    /// A passing sample.
    #[must_use]
    pub fn ok(latency: Duration) -> Self {
        Self { timestamp: Utc::now(), status: HealthStatus::Ok, latency, message: None }
    }

    /// A failing sample carrying the error message.
    #[must_use]
    pub fn error(latency: Duration, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: HealthStatus::Error,
            latency,
            message: Some(message.into()),
        }
    }
}

/// Circular buffer of [`HealthSample`]s with capacity fixed at construction
pub struct RingHistory {
    inner: Mutex<Ring>,
}

struct Ring {
    data: Vec<HealthSample>,
    capacity: usize,
    head: usize,
    size: usize,
}

impl RingHistory {
    /// Create a history holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring history capacity must be non-zero");
        Self {
            inner: Mutex::new(Ring { data: Vec::with_capacity(capacity), capacity, head: 0, size: 0 }),
        }
    }

    /// Append a sample, evicting the oldest when at capacity.
    pub fn add(&self, sample: HealthSample) {
        let mut ring = self.inner.lock();
        let head = ring.head;
        if ring.data.len() < ring.capacity {
            ring.data.push(sample);
        } else {
            ring.data[head] = sample;
        }
        ring.head = (head + 1) % ring.capacity;
        if ring.size < ring.capacity {
            ring.size += 1;
        }
    }

    /// All retained samples, oldest first.
    #[must_use]
    pub fn get_all(&self) -> Vec<HealthSample> {
        let ring = self.inner.lock();
        if ring.size == ring.capacity {
            let mut out = Vec::with_capacity(ring.capacity);
            out.extend_from_slice(&ring.data[ring.head..]);
            out.extend_from_slice(&ring.data[..ring.head]);
            out
        } else {
            ring.data[..ring.size].to_vec()
        }
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().size
    }

    /// True when no samples have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u64) -> HealthSample {
        HealthSample::ok(Duration::from_millis(n))
    }

    fn latencies(history: &RingHistory) -> Vec<u64> {
        history
            .get_all()
            .iter()
            .map(|s| u64::try_from(s.latency.as_millis()).unwrap())
            .collect()
    }

    #[test]
    fn empty_history() {
        let history = RingHistory::new(4);
        assert!(history.is_empty());
        assert!(history.get_all().is_empty());
    }

    #[test]
    fn partial_fill_keeps_insertion_order() {
        let history = RingHistory::new(4);
        for n in 1..=3 {
            history.add(sample(n));
        }
        assert_eq!(latencies(&history), vec![1, 2, 3]);
    }

    #[test]
    fn full_buffer_evicts_oldest_first() {
        let history = RingHistory::new(3);
        for n in 1..=5 {
            history.add(sample(n));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(latencies(&history), vec![3, 4, 5]);
    }

    #[test]
    fn exact_capacity_boundary() {
        let history = RingHistory::new(3);
        for n in 1..=3 {
            history.add(sample(n));
        }
        assert_eq!(latencies(&history), vec![1, 2, 3]);
        history.add(sample(4));
        assert_eq!(latencies(&history), vec![2, 3, 4]);
    }

    #[test]
    fn last_min_n_capacity_in_order() {
        for capacity in [1usize, 2, 7] {
            for n in 0u64..20 {
                let history = RingHistory::new(capacity);
                for i in 0..n {
                    history.add(sample(i));
                }
                let expected: Vec<u64> =
                    (n.saturating_sub(capacity as u64)..n).collect();
                assert_eq!(latencies(&history), expected, "capacity={capacity} n={n}");
            }
        }
    }

    #[test]
    fn error_sample_carries_message() {
        let history = RingHistory::new(2);
        history.add(HealthSample::error(Duration::from_millis(7), "boom"));
        let all = history.get_all();
        assert_eq!(all[0].status, HealthStatus::Error);
        assert_eq!(all[0].message.as_deref(), Some("boom"));
    }
}
