use std::time::Duration;

pub const DEFAULT_MAX_FPS_ATTRIBUTE: &str = "MaxFps";

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Period of the timer-driven loop. The default asks for a tick as often
    /// as the scheduler allows.
    pub timer_interval: Duration,
    /// Upper bound on deferred actions pulled for a single list-actions opcode.
    pub max_drained_actions: u32,
    /// Engine attribute that selects surface-driven cadence when true.
    pub max_fps_attribute: String,
    pub metrics_log_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            timer_interval: Duration::from_millis(1),
            max_drained_actions: 256,
            max_fps_attribute: DEFAULT_MAX_FPS_ATTRIBUTE.to_string(),
            metrics_log_interval: Duration::from_secs(1),
        }
    }
}

impl BridgeConfig {
    pub(crate) fn normalized(mut self) -> Self {
        if self.timer_interval.is_zero() {
            self.timer_interval = Duration::from_millis(1);
        }
        if self.metrics_log_interval.is_zero() {
            self.metrics_log_interval = Duration::from_secs(1);
        }
        self.max_drained_actions = self.max_drained_actions.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config = BridgeConfig {
            timer_interval: Duration::ZERO,
            max_drained_actions: 0,
            max_fps_attribute: "MaxFps".to_string(),
            metrics_log_interval: Duration::ZERO,
        }
        .normalized();

        assert_eq!(config.timer_interval, Duration::from_millis(1));
        assert_eq!(config.max_drained_actions, 1);
        assert_eq!(config.metrics_log_interval, Duration::from_secs(1));
    }
}
