//! Seam between the worker and the underlying NSQ client library.
//!
//! The worker only needs a handful of client operations: build a consumer,
//! register concurrent handlers, point it at nsqlookupd, adjust the in-flight
//! ceiling and stop. Everything protocol-related stays inside the client.

use crate::config::ConsumerConfig;
use crate::error::NsqError;
use async_trait::async_trait;
use messaging::ProcessingError;
use std::sync::Arc;
use std::time::Duration;

/// A message as delivered by the client.
#[async_trait]
pub trait DeliveredMessage: Send + Sized + 'static {
    /// Raw payload.
    fn body(&self) -> &[u8];

    /// Delivery attempt count (1 on first delivery).
    fn attempts(&self) -> u16;

    /// Acknowledge the message.
    async fn finish(self);

    /// Ask the server to redeliver after `delay`, without entering client backoff.
    async fn requeue_without_backoff(self, delay: Duration);
}

/// Callback the client invokes for every delivered message.
///
/// The callback owns the message and is responsible for finishing or
/// requeueing it.
#[async_trait]
pub trait MessageHandler<M: DeliveredMessage>: Send + Sync {
    async fn handle_message(&self, message: M) -> Result<(), ProcessingError>;
}

/// Consumer handle of the underlying client.
///
/// Implementations must be safe to use from the connect loop and the handler
/// tasks at the same time.
#[async_trait]
pub trait ConsumerClient: Send + Sync + Sized + 'static {
    type Message: DeliveredMessage;

    /// Create a consumer for `topic`/`channel`. Rejected configuration is an error.
    fn create(topic: &str, channel: &str, config: ConsumerConfig) -> Result<Self, NsqError>;

    /// Register `handler` to run on `concurrency` concurrent tasks.
    ///
    /// Must be called from within a tokio runtime, before connecting.
    fn add_concurrent_handlers(
        &self,
        handler: Arc<dyn MessageHandler<Self::Message>>,
        concurrency: usize,
    ) -> Result<(), NsqError>;

    /// Add an nsqlookupd address and start discovering producers through it.
    ///
    /// Connecting to an address that is already known succeeds without doing
    /// anything.
    async fn connect_to_lookupd(&self, address: &str) -> Result<(), NsqError>;

    /// Update the in-flight ceiling on every connection. 0 pauses delivery.
    async fn change_max_in_flight(&self, max_in_flight: u32);

    /// Stop consuming and close connections.
    async fn stop(&self);
}
