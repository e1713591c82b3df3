//! Subscription configuration.

use crate::handler::Handler;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A single topic subscription.
///
/// Backend-agnostic: every worker backend reads the settings it understands
/// and ignores the rest. Supplied once when a worker is built.
#[derive(Clone)]
pub struct Subscription {
    /// Consumer/channel name
    pub name: String,

    /// Topic to consume
    pub topic: String,

    /// Handler invoked for every delivered message
    pub handler: Arc<dyn Handler>,

    /// Maximum deliveries of a single message (0 = unlimited)
    pub max_requeue: u16,

    /// Concurrent handler invocations; values ≤ 0 are treated as 1
    pub concurrent: i32,

    /// Time a message may stay in flight before the broker redelivers it
    pub timeout: Duration,

    /// Messages delivered before acknowledgment is required
    pub max_in_flight: u32,
}

impl Subscription {
    /// Create a subscription with the broker-side defaults
    /// (5 attempts, 60s timeout, 1 in flight, 1 concurrent handler).
    pub fn new(
        topic: impl Into<String>,
        name: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            handler,
            max_requeue: 5,
            concurrent: 1,
            timeout: Duration::from_secs(60),
            max_in_flight: 1,
        }
    }

    pub fn with_max_requeue(mut self, max_requeue: u16) -> Self {
        self.max_requeue = max_requeue;
        self
    }

    pub fn with_concurrency(mut self, concurrent: i32) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .field("handler", &self.handler.name())
            .field("max_requeue", &self.max_requeue)
            .field("concurrent", &self.concurrent)
            .field("timeout", &self.timeout)
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}
