//! Prometheus metrics for NSQ workers.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metrics for one subscription.
#[derive(Clone)]
pub struct NsqMetrics {
    topic: String,
    channel: String,
    handler: String,
}

impl NsqMetrics {
    pub fn new(topic: &str, channel: &str, handler: &str) -> Self {
        Self {
            topic: topic.to_string(),
            channel: channel.to_string(),
            handler: handler.to_string(),
        }
    }

    /// Handler label attached to message metrics.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Record a message handed to the handler.
    pub fn message_received(&self) {
        counter!(
            "nsq_worker_messages_received_total",
            "topic" => self.topic.clone(),
            "channel" => self.channel.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    /// Record a message acknowledged after the handler succeeded.
    pub fn message_finished(&self, duration: Duration) {
        counter!(
            "nsq_worker_messages_finished_total",
            "topic" => self.topic.clone(),
            "channel" => self.channel.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);

        self.record_duration(duration);
    }

    /// Record a message requeued after the handler failed.
    pub fn message_requeued(&self, duration: Duration) {
        counter!(
            "nsq_worker_messages_requeued_total",
            "topic" => self.topic.clone(),
            "channel" => self.channel.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);

        self.record_duration(duration);
    }

    /// Record a failed nsqlookupd connection attempt.
    pub fn lookupd_connect_failed(&self) {
        counter!(
            "nsq_worker_lookupd_connect_failures_total",
            "topic" => self.topic.clone(),
            "channel" => self.channel.clone()
        )
        .increment(1);
    }

    /// Record the in-flight ceiling currently requested from the consumer.
    pub fn max_in_flight(&self, max_in_flight: u32) {
        gauge!(
            "nsq_worker_max_in_flight",
            "topic" => self.topic.clone(),
            "channel" => self.channel.clone()
        )
        .set(f64::from(max_in_flight));
    }

    fn record_duration(&self, duration: Duration) {
        histogram!(
            "nsq_worker_handler_duration_seconds",
            "topic" => self.topic.clone(),
            "channel" => self.channel.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }
}
