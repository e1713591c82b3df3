//! NSQ consumer worker.

use crate::client::ConsumerClient;
use crate::config::ConsumerConfig;
use crate::error::NsqError;
use crate::metrics::NsqMetrics;
use crate::middleware::Middleware;
use crate::retry::{ConnectRetry, RetryDecision};
use core_config::NsqConfig;
use messaging::{async_trait, Handler, Subscription, Worker};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of an [`NsqWorker`]. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Consuming,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Created => write!(f, "created"),
            WorkerState::Consuming => write!(f, "consuming"),
            WorkerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Concurrency actually used for handler registration.
pub fn normalize_concurrency(concurrent: i32) -> usize {
    if concurrent <= 0 {
        1
    } else {
        concurrent as usize
    }
}

/// Consumes one NSQ topic/channel through a [`ConsumerClient`].
pub struct NsqWorker<C: ConsumerClient> {
    consumer: C,
    topic: String,
    channel: String,
    concurrent: i32,
    lookupd: String,
    retry: u32,
    content_type: String,
    reconnect_interval: Duration,
    stop_on_retry_exhausted: bool,
    metrics: NsqMetrics,
    state: watch::Sender<WorkerState>,
}

impl<C: ConsumerClient> NsqWorker<C> {
    /// Create the underlying consumer for `subscription`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookupd address is empty or the client rejects
    /// the topic, channel or consumer settings.
    pub fn new(config: &NsqConfig, subscription: &Subscription) -> Result<Self, NsqError> {
        if config.lookupd_url.trim().is_empty() {
            return Err(NsqError::Config(
                "lookupd address must not be empty".to_string(),
            ));
        }

        let client_config = ConsumerConfig::from(subscription);
        let consumer = C::create(&subscription.topic, &subscription.name, client_config)?;
        let (state, _) = watch::channel(WorkerState::Created);
        let metrics = NsqMetrics::new(
            &subscription.topic,
            &subscription.name,
            subscription.handler.name(),
        );
        metrics.max_in_flight(subscription.max_in_flight);

        debug!(
            topic = %subscription.topic,
            channel = %subscription.name,
            max_attempts = subscription.max_requeue,
            max_in_flight = subscription.max_in_flight,
            "NSQ consumer created"
        );

        Ok(Self {
            consumer,
            topic: subscription.topic.clone(),
            channel: subscription.name.clone(),
            concurrent: subscription.concurrent,
            lookupd: config.lookupd_url.clone(),
            retry: config.retry,
            content_type: config.content_type.clone(),
            reconnect_interval: config.reconnect_interval,
            stop_on_retry_exhausted: config.stop_on_retry_exhausted,
            metrics,
            state,
        })
    }

    /// The underlying consumer handle.
    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn metrics(&self) -> &NsqMetrics {
        &self.metrics
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Handler concurrency, never below 1.
    pub fn concurrency(&self) -> usize {
        normalize_concurrency(self.concurrent)
    }

    /// Register `handler` and keep the consumer connected to nsqlookupd.
    ///
    /// Runs until [`stop`](Self::stop) is called. Transient connection failures
    /// are logged and retried every `reconnect_interval`; the retry counter
    /// resets after every success. When the retry budget is spent the loop
    /// keeps going unless `stop_on_retry_exhausted` is set, in which case the
    /// consumer is stopped and [`NsqError::RetriesExhausted`] is returned.
    ///
    /// A client error that is not transient, or a failed handler registration,
    /// stops the worker and is returned. Metrics are labelled with the
    /// subscription's handler name.
    #[instrument(skip(self, handler), fields(topic = %self.topic, channel = %self.channel))]
    pub async fn consume(&self, handler: Arc<dyn Handler>) -> Result<(), NsqError> {
        self.begin_consuming()?;

        let concurrency = self.concurrency();
        let middleware = Arc::new(Middleware::new(
            handler,
            self.content_type.clone(),
            self.metrics.clone(),
        ));
        if let Err(e) = self
            .consumer
            .add_concurrent_handlers(middleware, concurrency)
        {
            self.state.send_replace(WorkerState::Stopped);
            return Err(e);
        }

        info!(
            concurrency,
            lookupd = %self.lookupd,
            retry = self.retry,
            "Starting NSQ worker"
        );

        let mut state_rx = self.state.subscribe();
        let mut retry = ConnectRetry::new(self.retry);

        loop {
            let stopped = *state_rx.borrow_and_update() == WorkerState::Stopped;
            if stopped {
                break;
            }

            match self.consumer.connect_to_lookupd(&self.lookupd).await {
                Ok(()) => retry.record_success(),
                Err(_) if self.state() == WorkerState::Stopped => break,
                Err(e) if !e.is_transient() => {
                    error!(error = %e, "Consumer rejected lookupd connection, stopping worker");
                    self.stop().await?;
                    return Err(e);
                }
                Err(e) => {
                    let decision = retry.record_failure();
                    self.metrics.lookupd_connect_failed();
                    warn!(
                        attempt = retry.failures(),
                        error = %e,
                        "Worker failed to connect to lookupd"
                    );

                    if let RetryDecision::Exhausted { attempts } = decision {
                        if self.stop_on_retry_exhausted {
                            error!(attempts, "Lookupd retry budget exhausted, stopping worker");
                            self.stop().await?;
                            return Err(NsqError::RetriesExhausted { attempts });
                        }

                        if attempts == self.retry.saturating_add(1) {
                            error!(attempts, "Lookupd retry budget exhausted, still retrying");
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_interval) => {}
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("NSQ worker stopped");
        Ok(())
    }

    /// Stop the underlying consumer and end a running [`consume`](Self::consume).
    ///
    /// The worker is marked stopped before the consumer drains its handlers, so
    /// the connect loop never counts the shutdown as a failed attempt. Always
    /// succeeds.
    pub async fn stop(&self) -> Result<(), NsqError> {
        let previous = self.state.send_replace(WorkerState::Stopped);
        if previous != WorkerState::Stopped {
            info!(topic = %self.topic, channel = %self.channel, "Stopping NSQ worker");
        }

        self.consumer.stop().await;
        Ok(())
    }

    /// Forward a new in-flight ceiling to the consumer. 0 pauses delivery.
    pub async fn change_max_in_flight(&self, max_in_flight: u32) {
        debug!(
            topic = %self.topic,
            channel = %self.channel,
            max_in_flight,
            "Changing max in flight"
        );
        self.consumer.change_max_in_flight(max_in_flight).await;
        self.metrics.max_in_flight(max_in_flight);
    }

    fn begin_consuming(&self) -> Result<(), NsqError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            let current = *state;
            match current {
                WorkerState::Created => {
                    *state = WorkerState::Consuming;
                    true
                }
                WorkerState::Consuming => {
                    outcome = Err(NsqError::AlreadyConsuming);
                    false
                }
                WorkerState::Stopped => {
                    outcome = Err(NsqError::Stopped);
                    false
                }
            }
        });
        outcome
    }
}

#[async_trait]
impl<C: ConsumerClient> Worker for NsqWorker<C> {
    type Error = NsqError;

    async fn consume(&self, handler: Arc<dyn Handler>) -> Result<(), NsqError> {
        NsqWorker::consume(self, handler).await
    }

    async fn stop(&self) -> Result<(), NsqError> {
        NsqWorker::stop(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_concurrency() {
        assert_eq!(normalize_concurrency(i32::MIN), 1);
        assert_eq!(normalize_concurrency(-1), 1);
        assert_eq!(normalize_concurrency(0), 1);
        assert_eq!(normalize_concurrency(1), 1);
        assert_eq!(normalize_concurrency(16), 16);
    }

    #[test]
    fn test_worker_state_display() {
        assert_eq!(WorkerState::Created.to_string(), "created");
        assert_eq!(WorkerState::Consuming.to_string(), "consuming");
        assert_eq!(WorkerState::Stopped.to_string(), "stopped");
    }
}
