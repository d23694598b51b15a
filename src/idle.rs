//! Connection activity tracking for heartbeats.
//!
//! Both directions feed the same monitor: the read loop records every
//! chunk received, the writer task records every batch written. The read
//! loop sleeps until [`IdleMonitor::deadline`] and sends a heartbeat when
//! the window elapsed without traffic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Last-activity clock shared by the reader and writer of a connection.
#[derive(Debug)]
pub struct IdleMonitor {
    origin: Instant,
    /// Nanoseconds from `origin` to the last recorded activity.
    last_activity: AtomicU64,
}

impl IdleMonitor {
    /// Monitor whose last activity is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_activity: AtomicU64::new(0),
        }
    }

    /// Mark the connection as active now.
    #[inline]
    pub fn record_activity(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_activity.fetch_max(elapsed, Ordering::AcqRel);
    }

    /// Instant of the last recorded activity.
    pub fn last_activity(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_activity.load(Ordering::Acquire))
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last_activity().elapsed()
    }

    /// When the connection becomes idle if nothing happens until then.
    pub fn deadline(&self, window: Duration) -> Instant {
        self.last_activity() + window
    }

    /// Whether a full `window` passed without activity.
    pub fn is_idle(&self, window: Duration) -> bool {
        self.idle_for() >= window
    }
}

impl Default for IdleMonitor {
    fn default() -> Self {
        Self::new()
    }
}
