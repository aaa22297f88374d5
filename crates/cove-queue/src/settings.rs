use cove_config::DispatchConfig;
use std::time::Duration;

/// Runtime knobs of the dispatch loop, resolved from `DispatchConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_server_retries: u32,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
    pub handler_timeout: Option<Duration>,
    pub background_threshold: Duration,
    pub fetch_detail_after_restart: bool,
}

impl QueueSettings {
    /// Delay before the `attempt`-th retry (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1 << exponent)
            .min(self.max_retry_backoff)
    }
}

impl From<&DispatchConfig> for QueueSettings {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_server_retries: config.max_server_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(config.max_retry_backoff_ms),
            handler_timeout: (config.handler_timeout_secs > 0)
                .then(|| Duration::from_secs(config.handler_timeout_secs)),
            background_threshold: Duration::from_secs(config.background_threshold_secs),
            fetch_detail_after_restart: config.fetch_detail_after_restart,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let settings = QueueSettings::default();
        assert_eq!(settings.backoff_for(1), Duration::from_millis(500));
        assert_eq!(settings.backoff_for(2), Duration::from_millis(1_000));
        assert_eq!(settings.backoff_for(3), Duration::from_millis(2_000));
        assert_eq!(settings.backoff_for(40), Duration::from_secs(30));
    }

    #[test]
    fn zero_timeout_disables_it() {
        let config = DispatchConfig {
            handler_timeout_secs: 0,
            ..DispatchConfig::default()
        };
        assert_eq!(QueueSettings::from(&config).handler_timeout, None);
        assert_eq!(
            QueueSettings::default().handler_timeout,
            Some(Duration::from_secs(120))
        );
    }
}
