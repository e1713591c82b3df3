//! Client-level consumer configuration.

use crate::error::NsqError;
use messaging::Subscription;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\.a-zA-Z0-9_-]+(#ephemeral)?$").expect("valid name regex"));

const MAX_NAME_LEN: usize = 64;

/// Settings handed to the queue client when a consumer is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Deliveries before the client gives up on a message (0 = unlimited)
    pub max_attempts: u16,

    /// Server-side in-flight timeout per message
    pub msg_timeout: Duration,

    /// Messages delivered before acknowledgment is required
    pub max_in_flight: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            msg_timeout: Duration::from_secs(60),
            max_in_flight: 1,
        }
    }
}

impl From<&Subscription> for ConsumerConfig {
    fn from(subscription: &Subscription) -> Self {
        Self {
            max_attempts: subscription.max_requeue,
            msg_timeout: subscription.timeout,
            max_in_flight: subscription.max_in_flight,
        }
    }
}

/// Whether a delivery on its `attempts`th try should be given up on.
/// A `max_attempts` of 0 never gives up.
pub(crate) fn exceeds_max_attempts(attempts: u16, max_attempts: u16) -> bool {
    max_attempts > 0 && attempts > max_attempts
}

/// Whether `name` is a legal NSQ topic or channel name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN && VALID_NAME.is_match(name)
}

pub fn validate_topic_name(topic: &str) -> Result<(), NsqError> {
    if is_valid_name(topic) {
        Ok(())
    } else {
        Err(NsqError::InvalidTopic(topic.to_string()))
    }
}

pub fn validate_channel_name(channel: &str) -> Result<(), NsqError> {
    if is_valid_name(channel) {
        Ok(())
    } else {
        Err(NsqError::InvalidChannel(channel.to_string()))
    }
}
