//! Bridges client deliveries into `messaging::Handler` calls.

use crate::client::{DeliveredMessage, MessageHandler};
use crate::metrics::NsqMetrics;
use async_trait::async_trait;
use messaging::{Handler, Message, ProcessingError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Fixed redelivery delay for messages whose handler failed.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(60);

/// Wraps a [`Handler`]: builds the generic [`Message`], then finishes the
/// delivery on success or requeues it after [`REQUEUE_DELAY`] on failure.
pub struct Middleware {
    handler: Arc<dyn Handler>,
    content_type: String,
    metrics: NsqMetrics,
}

impl Middleware {
    pub fn new(handler: Arc<dyn Handler>, content_type: impl Into<String>, metrics: NsqMetrics) -> Self {
        Self {
            handler,
            content_type: content_type.into(),
            metrics,
        }
    }
}

#[async_trait]
impl<M: DeliveredMessage> MessageHandler<M> for Middleware {
    async fn handle_message(&self, message: M) -> Result<(), ProcessingError> {
        let record = Message::new(
            message.body().to_vec(),
            u32::from(message.attempts()),
            self.content_type.clone(),
        );

        self.metrics.message_received();

        let start = Instant::now();
        let result = self.handler.handle(&record).await;
        let duration = start.elapsed();

        match result {
            Ok(()) => {
                message.finish().await;
                self.metrics.message_finished(duration);

                debug!(
                    handler = self.handler.name(),
                    attempts = record.attempts,
                    duration_ms = duration.as_millis(),
                    "Message finished"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    handler = self.handler.name(),
                    attempts = record.attempts,
                    error = %e,
                    delay_secs = REQUEUE_DELAY.as_secs(),
                    "Handler failed, requeueing message"
                );

                message.requeue_without_backoff(REQUEUE_DELAY).await;
                self.metrics.message_requeued(duration);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::{handler_fn, FailingHandler, NoOpHandler};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Disposition {
        Finished,
        Requeued(Duration),
    }

    struct TestMessage {
        body: Vec<u8>,
        attempts: u16,
        log: Arc<Mutex<Vec<Disposition>>>,
    }

    #[async_trait]
    impl DeliveredMessage for TestMessage {
        fn body(&self) -> &[u8] {
            &self.body
        }

        fn attempts(&self) -> u16 {
            self.attempts
        }

        async fn finish(self) {
            self.log.lock().unwrap().push(Disposition::Finished);
        }

        async fn requeue_without_backoff(self, delay: Duration) {
            self.log.lock().unwrap().push(Disposition::Requeued(delay));
        }
    }

    fn delivery(log: &Arc<Mutex<Vec<Disposition>>>) -> TestMessage {
        TestMessage {
            body: b"hello".to_vec(),
            attempts: 3,
            log: log.clone(),
        }
    }

    fn metrics() -> NsqMetrics {
        NsqMetrics::new("orders", "billing", "test")
    }

    #[tokio::test]
    async fn test_success_finishes_and_does_not_requeue() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middleware = Middleware::new(Arc::new(NoOpHandler), "application/json", metrics());

        middleware.handle_message(delivery(&log)).await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![Disposition::Finished]);
    }

    #[tokio::test]
    async fn test_failure_requeues_after_one_minute_and_propagates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let middleware = Middleware::new(
            Arc::new(FailingHandler::new("db down")),
            "application/json",
            metrics(),
        );

        let err = middleware.handle_message(delivery(&log)).await.unwrap_err();

        assert_eq!(err.to_string(), "handler failed: db down");
        assert_eq!(
            *log.lock().unwrap(),
            vec![Disposition::Requeued(Duration::from_secs(60))]
        );
    }

    #[tokio::test]
    async fn test_handler_sees_body_attempts_and_content_type() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(None));
        let capture = seen.clone();
        let handler = handler_fn("capture", move |msg: Message| {
            let capture = capture.clone();
            async move {
                *capture.lock().unwrap() = Some(msg);
                Ok(())
            }
        });
        let middleware = Middleware::new(Arc::new(handler), "text/plain", metrics());

        middleware.handle_message(delivery(&log)).await.unwrap();

        let message = seen.lock().unwrap().take().unwrap();
        assert_eq!(message, Message::new("hello", 3, "text/plain"));
    }
}
