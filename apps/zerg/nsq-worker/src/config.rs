//! Configuration for the NSQ worker service

use core_config::{env_or_default, env_parse, env_required, ConfigError, FromEnv, NsqConfig};
use messaging::{Handler, Subscription};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_HEALTH_PORT: u16 = 8083;
const DEFAULT_CHANNEL: &str = "zerg-nsq-worker";

/// Settings for the single subscription this service runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    pub topic: String,
    pub channel: String,
    pub concurrency: i32,
    pub max_requeue: u16,
    pub timeout: Duration,
    pub max_in_flight: u32,
}

impl SubscriptionSettings {
    /// Build the subscription for `handler`.
    pub fn subscription(&self, handler: Arc<dyn Handler>) -> Subscription {
        Subscription::new(self.topic.clone(), self.channel.clone(), handler)
            .with_concurrency(self.concurrency)
            .with_max_requeue(self.max_requeue)
            .with_timeout(self.timeout)
            .with_max_in_flight(self.max_in_flight)
    }
}

impl FromEnv for SubscriptionSettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            topic: env_required("NSQ_TOPIC")?,
            channel: env_or_default("NSQ_CHANNEL", DEFAULT_CHANNEL),
            concurrency: env_parse("NSQ_CONCURRENCY", 1)?,
            max_requeue: env_parse("NSQ_MAX_REQUEUE", 5)?,
            timeout: Duration::from_secs(env_parse("NSQ_TIMEOUT_SECS", 60)?),
            max_in_flight: env_parse("NSQ_MAX_IN_FLIGHT", 1)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port for /health, /ready and /metrics
    pub health_port: u16,
    pub nsq: NsqConfig,
    pub subscription: SubscriptionSettings,
}

impl FromEnv for Config {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            health_port: env_parse("HEALTH_PORT", DEFAULT_HEALTH_PORT)?,
            nsq: NsqConfig::from_env()?,
            subscription: SubscriptionSettings::from_env()?,
        })
    }
}
