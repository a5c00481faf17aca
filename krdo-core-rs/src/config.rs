//! Cluster timing and capacity configuration

use std::time::Duration;

/// Default clock tick period
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on per-tick clock drift
pub const DEFAULT_DRIFT_RATE: f64 = 0.05;

/// Default wait before a sync requester presumes its coordinator dead
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-node mailbox depth
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Tunables for a simulated cluster
#[derive(Debug, Clone, Copy)]
pub struct ClusterConfig {
    /// Clock advance period
    pub tick_interval: Duration,
    /// Uniform drift bound applied per tick
    pub drift_rate: f64,
    /// How long a sync requester waits before presuming the coordinator dead
    pub sync_timeout: Duration,
    /// Bounded mailbox depth per node
    pub mailbox_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            drift_rate: DEFAULT_DRIFT_RATE,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

impl ClusterConfig {
    /// Compressed timing for tests and scripted scenarios. Semantics are
    /// unchanged; only the timescale shrinks.
    pub fn accelerated() -> Self {
        Self {
            tick_interval: Duration::from_millis(20),
            drift_rate: DEFAULT_DRIFT_RATE,
            sync_timeout: Duration::from_millis(300),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing() {
        let config = ClusterConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.drift_rate, 0.05);
        assert_eq!(config.sync_timeout, Duration::from_secs(5));
        assert_eq!(config.mailbox_capacity, 100);
    }

    #[test]
    fn test_accelerated_keeps_timeout_above_tick() {
        let config = ClusterConfig::accelerated();
        assert!(config.sync_timeout > config.tick_interval);
    }
}
