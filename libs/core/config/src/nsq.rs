use crate::{env_or_default, env_parse, env_required, ConfigError, FromEnv};
use std::time::Duration;

/// Content type stamped on delivered messages when none is configured.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Connection settings shared by every NSQ subscription of a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NsqConfig {
    /// nsqlookupd HTTP address (e.g. `http://127.0.0.1:4161`)
    pub lookupd_url: String,

    /// Consecutive lookupd connection failures tolerated (0 = unlimited)
    pub retry: u32,

    /// Content type stamped on every delivered message
    pub content_type: String,

    /// Wait between lookupd connection attempts
    pub reconnect_interval: Duration,

    /// Return an error from the connect loop once `retry` is exhausted
    pub stop_on_retry_exhausted: bool,
}

impl NsqConfig {
    pub fn new(lookupd_url: impl Into<String>) -> Self {
        Self {
            lookupd_url: lookupd_url.into(),
            retry: 0,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            reconnect_interval: Duration::from_secs(1),
            stop_on_retry_exhausted: false,
        }
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_stop_on_retry_exhausted(mut self, stop: bool) -> Self {
        self.stop_on_retry_exhausted = stop;
        self
    }
}

impl FromEnv for NsqConfig {
    /// Reads:
    /// - NSQ_LOOKUPD_URL (required)
    /// - NSQ_RETRY: defaults to 0 (unlimited)
    /// - NSQ_CONTENT_TYPE: defaults to application/json
    /// - NSQ_RECONNECT_INTERVAL_MS: defaults to 1000
    /// - NSQ_STOP_ON_RETRY_EXHAUSTED: defaults to false
    fn from_env() -> Result<Self, ConfigError> {
        let lookupd_url = env_required("NSQ_LOOKUPD_URL")?;
        if lookupd_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "NSQ_LOOKUPD_URL".to_string(),
                details: "must not be empty".to_string(),
            });
        }

        let reconnect_ms: u64 = env_parse("NSQ_RECONNECT_INTERVAL_MS", 1000)?;

        Ok(Self {
            lookupd_url,
            retry: env_parse("NSQ_RETRY", 0)?,
            content_type: env_or_default("NSQ_CONTENT_TYPE", DEFAULT_CONTENT_TYPE),
            reconnect_interval: Duration::from_millis(reconnect_ms),
            stop_on_retry_exhausted: env_parse("NSQ_STOP_ON_RETRY_EXHAUSTED", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 5] = [
        "NSQ_LOOKUPD_URL",
        "NSQ_RETRY",
        "NSQ_CONTENT_TYPE",
        "NSQ_RECONNECT_INTERVAL_MS",
        "NSQ_STOP_ON_RETRY_EXHAUSTED",
    ];

    #[test]
    fn test_nsq_config_from_env_defaults() {
        temp_env::with_vars(
            [
                ("NSQ_LOOKUPD_URL", Some("http://lookupd:4161")),
                ("NSQ_RETRY", None),
                ("NSQ_CONTENT_TYPE", None),
                ("NSQ_RECONNECT_INTERVAL_MS", None),
                ("NSQ_STOP_ON_RETRY_EXHAUSTED", None),
            ],
            || {
                let config = NsqConfig::from_env().unwrap();
                assert_eq!(config.lookupd_url, "http://lookupd:4161");
                assert_eq!(config.retry, 0);
                assert_eq!(config.content_type, "application/json");
                assert_eq!(config.reconnect_interval, Duration::from_secs(1));
                assert!(!config.stop_on_retry_exhausted);
            },
        );
    }

    #[test]
    fn test_nsq_config_from_env_custom_values() {
        temp_env::with_vars(
            [
                ("NSQ_LOOKUPD_URL", Some("http://10.0.0.5:4161")),
                ("NSQ_RETRY", Some("5")),
                ("NSQ_CONTENT_TYPE", Some("application/protobuf")),
                ("NSQ_RECONNECT_INTERVAL_MS", Some("250")),
                ("NSQ_STOP_ON_RETRY_EXHAUSTED", Some("true")),
            ],
            || {
                let config = NsqConfig::from_env().unwrap();
                assert_eq!(config.retry, 5);
                assert_eq!(config.content_type, "application/protobuf");
                assert_eq!(config.reconnect_interval, Duration::from_millis(250));
                assert!(config.stop_on_retry_exhausted);
            },
        );
    }

    #[test]
    fn test_nsq_config_from_env_missing_lookupd() {
        temp_env::with_vars_unset(VARS, || {
            let err = NsqConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("NSQ_LOOKUPD_URL"));
        });
    }

    #[test]
    fn test_nsq_config_from_env_empty_lookupd() {
        temp_env::with_var("NSQ_LOOKUPD_URL", Some("  "), || {
            let err = NsqConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }));
        });
    }

    #[test]
    fn test_nsq_config_from_env_invalid_retry() {
        temp_env::with_vars(
            [
                ("NSQ_LOOKUPD_URL", Some("http://lookupd:4161")),
                ("NSQ_RETRY", Some("-1")),
            ],
            || {
                let err = NsqConfig::from_env().unwrap_err();
                assert!(err.to_string().contains("NSQ_RETRY"));
            },
        );
    }

    #[test]
    fn test_nsq_config_builder() {
        let config = NsqConfig::new("http://127.0.0.1:4161")
            .with_retry(3)
            .with_content_type("text/plain")
            .with_reconnect_interval(Duration::from_millis(10))
            .with_stop_on_retry_exhausted(true);

        assert_eq!(config.lookupd_url, "http://127.0.0.1:4161");
        assert_eq!(config.retry, 3);
        assert_eq!(config.content_type, "text/plain");
        assert_eq!(config.reconnect_interval, Duration::from_millis(10));
        assert!(config.stop_on_retry_exhausted);
    }
}
