use std::time::Duration;

/// Webhook tunables, read from Rocket's figment (`Rocket.toml` or `ROCKET_*`).
#[derive(serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    /// Budget for all cluster reads made while handling one admission request.
    #[serde(default = "WebhookConfig::default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "WebhookConfig::default_body_limit_kib")]
    pub body_limit_kib: u64,
    #[serde(default = "WebhookConfig::default_replica_sink_capacity")]
    pub replica_sink_capacity: usize,
}

impl WebhookConfig {
    fn default_lookup_timeout_ms() -> u64 {
        5000
    }

    fn default_body_limit_kib() -> u64 {
        3 * 1024
    }

    fn default_replica_sink_capacity() -> usize {
        1000
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            lookup_timeout_ms: Self::default_lookup_timeout_ms(),
            body_limit_kib: Self::default_body_limit_kib(),
            replica_sink_capacity: Self::default_replica_sink_capacity(),
        }
    }
}
