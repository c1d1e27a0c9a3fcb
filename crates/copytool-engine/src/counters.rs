//! Process-wide error counters shared by the control loop and item workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Major and minor error counts.
///
/// Workers increment without coordination; readers get a point-in-time value
/// that may miss increments from workers still running.
#[derive(Debug, Default)]
pub struct ErrorCounters {
    major: AtomicU64,
    minor: AtomicU64,
}

/// Point-in-time copy of [`ErrorCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    /// Operation-affecting errors.
    pub major: u64,
    /// Skipped items.
    pub minor: u64,
}

impl ErrorCounters {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an operation-affecting error.
    pub fn record_major(&self) {
        self.major.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a skipped item.
    pub fn record_minor(&self) {
        self.minor.fetch_add(1, Ordering::Relaxed);
    }

    /// Current major count.
    #[must_use]
    pub fn major(&self) -> u64 {
        self.major.load(Ordering::Relaxed)
    }

    /// Current minor count.
    #[must_use]
    pub fn minor(&self) -> u64 {
        self.minor.load(Ordering::Relaxed)
    }

    /// Both counts.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            major: self.major(),
            minor: self.minor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let counters = Arc::new(ErrorCounters::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let counters = Arc::clone(&counters);
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    counters.record_major();
                    counters.record_minor();
                }
            }));
        }
        for task in tasks {
            assert!(task.await.is_ok());
        }
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                major: 800,
                minor: 800
            }
        );
    }
}
