//! Relay configuration

use std::time::Duration;

use crate::media::gop::DEFAULT_MAX_GOP_SIZE;

/// Configuration for the loopback relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Broadcast channel capacity per stream (packets)
    ///
    /// A feed that falls further behind loses packets.
    pub broadcast_capacity: usize,

    /// Maximum GOP buffer size in bytes
    pub max_gop_size: usize,

    /// How long an ended stream without feeds is kept
    pub idle_stream_timeout: Duration,

    /// Interval between cleanup runs
    pub cleanup_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
            max_gop_size: DEFAULT_MAX_GOP_SIZE,
            idle_stream_timeout: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(10),
        }
    }
}

impl RelayConfig {
    /// Set the broadcast capacity
    pub fn broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity.max(1);
        self
    }

    /// Set the maximum GOP buffer size
    pub fn max_gop_size(mut self, bytes: usize) -> Self {
        self.max_gop_size = bytes;
        self
    }

    /// Set the idle stream timeout
    pub fn idle_stream_timeout(mut self, timeout: Duration) -> Self {
        self.idle_stream_timeout = timeout;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.broadcast_capacity, 1024);
        assert_eq!(config.max_gop_size, 4 * 1024 * 1024);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let config = RelayConfig::default().broadcast_capacity(0);
        assert_eq!(config.broadcast_capacity, 1);
    }
}
