//! Channel configuration for lockstep communication

use std::time::Duration;

/// Channel and barrier configuration for the lockstep driver
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Step event channel buffer size (producers -> driver)
    pub step_buffer: usize,

    /// Extra time the driver waits for a round beyond the step timeout
    pub round_grace: Duration,

    /// How often the driver checks that awaited producers are still alive
    pub liveness_interval: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            step_buffer: 64,
            round_grace: Duration::from_secs(30),
            liveness_interval: Duration::from_millis(100),
        }
    }
}

impl ChannelConfig {
    /// Set the step event buffer size
    pub fn with_step_buffer(mut self, size: usize) -> Self {
        self.step_buffer = size.max(1);
        self
    }

    /// Set the round grace period
    pub fn with_round_grace(mut self, grace: Duration) -> Self {
        self.round_grace = grace;
        self
    }

    /// Set the producer liveness check interval
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval.max(Duration::from_millis(1));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_config_default() {
        let config = ChannelConfig::default();
        assert_eq!(config.step_buffer, 64);
        assert_eq!(config.round_grace, Duration::from_secs(30));
        assert_eq!(config.liveness_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_channel_config_builder() {
        let config = ChannelConfig::default()
            .with_step_buffer(0)
            .with_round_grace(Duration::from_millis(500))
            .with_liveness_interval(Duration::ZERO);
        assert_eq!(config.step_buffer, 1);
        assert_eq!(config.liveness_interval, Duration::from_millis(1));
        assert_eq!(config.round_grace, Duration::from_millis(500));
    }
}
