// src/health/status.rs
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const NEVER_CHECKED: u64 = 0;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthStatus {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Cached liveness judgment for one backend.
///
/// Check results only flip the status after the configured number of
/// consecutive agreeing results. A judgment older than `freshness` is
/// treated as `Unknown`, and `Unknown` backends receive traffic.
///
/// Every field is atomic: `is_alive` runs on the request path and never
/// blocks behind the checker.
#[derive(Debug)]
pub struct HealthState {
    status: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    origin: Instant,
    /// Nanoseconds after `origin` of the last check, plus one. Zero means never.
    last_checked: AtomicU64,
    freshness: Duration,
}

impl HealthState {
    pub fn new(freshness: Duration) -> Self {
        Self {
            status: AtomicU8::new(HealthStatus::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            origin: Instant::now(),
            last_checked: AtomicU64::new(NEVER_CHECKED),
            freshness,
        }
    }

    /// Current status, with stale judgments reported as `Unknown`.
    pub fn status(&self) -> HealthStatus {
        if self.is_fresh() {
            HealthStatus::from(self.status.load(Ordering::Acquire))
        } else {
            HealthStatus::Unknown
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status() != HealthStatus::Unhealthy
    }

    /// Records one health check result. Returns the new status when it changed.
    pub fn record(
        &self,
        healthy: bool,
        healthy_threshold: usize,
        unhealthy_threshold: usize,
    ) -> Option<HealthStatus> {
        let previous = self.status();
        self.last_checked
            .store(self.nanos_since_origin().saturating_add(1), Ordering::Release);

        let next = if healthy {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
            (successes >= healthy_threshold).then_some(HealthStatus::Healthy)
        } else {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            (failures >= unhealthy_threshold).then_some(HealthStatus::Unhealthy)
        };

        match next {
            Some(status) => {
                self.status.store(status as u8, Ordering::Release);
                (status != previous).then_some(status)
            }
            None => {
                // A stale judgment is not carried forward as if it were fresh.
                if previous == HealthStatus::Unknown {
                    self.status.store(HealthStatus::Unknown as u8, Ordering::Release);
                }
                None
            }
        }
    }

    fn is_fresh(&self) -> bool {
        match self.last_checked.load(Ordering::Acquire) {
            NEVER_CHECKED => false,
            stamp => {
                let age = self.nanos_since_origin().saturating_sub(stamp - 1);
                Duration::from_nanos(age) <= self.freshness
            }
        }
    }

    fn nanos_since_origin(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_successes(&self) -> usize {
        self.consecutive_successes.load(Ordering::Relaxed)
    }
}
