use std::time::Duration;

use toolrelay_core::config::AppConfig;
use toolrelay_core::ScopeFilter;

/// Timing and capacity knobs for one runtime instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub max_concurrent_calls: usize,
    pub backpressure_poll: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_retry: Duration,
    pub reconnect_backoff: Duration,
    pub load_sample_interval: Duration,
    /// How long in-flight calls may run after shutdown is requested.
    pub shutdown_grace: Duration,
    pub scope: ScopeFilter,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 8,
            backpressure_poll: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(120),
            heartbeat_retry: Duration::from_secs(60),
            reconnect_backoff: Duration::from_secs(60),
            load_sample_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(15),
            scope: ScopeFilter::default(),
        }
    }
}

impl RuntimeOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let runtime = &config.runtime;
        Self {
            max_concurrent_calls: runtime.max_concurrent_calls,
            backpressure_poll: runtime.backpressure_poll(),
            heartbeat_interval: runtime.heartbeat_interval(),
            heartbeat_retry: runtime.heartbeat_retry(),
            reconnect_backoff: runtime.reconnect_backoff(),
            load_sample_interval: runtime.load_sample_interval(),
            shutdown_grace: Duration::from_secs(config.server.graceful_shutdown_secs),
            scope: config.scope.filter(),
        }
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use toolrelay_core::config::AppConfig;

    use super::RuntimeOptions;

    #[test]
    fn defaults_match_config_defaults() {
        let from_config = RuntimeOptions::from_config(&AppConfig::default());
        assert_eq!(from_config, RuntimeOptions::default());
    }

    #[test]
    fn scope_and_grace_come_from_their_sections() {
        let mut config = AppConfig::default();
        config.scope.location = Some("loc-7".to_owned());
        config.server.graceful_shutdown_secs = 3;

        let options = RuntimeOptions::from_config(&config);
        assert_eq!(options.scope.location.as_deref(), Some("loc-7"));
        assert_eq!(options.shutdown_grace, Duration::from_secs(3));
    }
}
