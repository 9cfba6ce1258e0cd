//! Coordinator policy knobs.

use std::time::Duration;

/// Default upper bound on a single dial attempt
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age after which a peer is reported as stale
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Default capacity of the lifecycle event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Timing and buffering policy for the connection coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// A dial with no answer after this long fails with `DialTimeout`
    pub dial_timeout: Duration,

    /// Minimum time a `Failed` peer waits before a retry is accepted
    pub retry_backoff: Duration,

    /// Minimum time between a disconnect and the next dial of the same peer
    pub reconnect_cooldown: Duration,

    /// Peers unseen for longer than this are flagged stale in snapshots
    pub stale_after: Duration,

    /// Lifecycle events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            retry_backoff: Duration::ZERO,
            reconnect_cooldown: Duration::ZERO,
            stale_after: DEFAULT_STALE_AFTER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    /// Set the dial timeout
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the retry backoff for failed peers
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Set the cooldown between disconnect and re-dial
    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    /// Set the staleness threshold
    pub fn with_stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = threshold;
        self
    }

    /// Set the event channel capacity (at least 1)
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}
