//! Handler trait for message consumption.

use crate::error::ProcessingError;
use crate::message::Message;
use async_trait::async_trait;
use std::future::Future;

/// Message handler trait.
///
/// Implement this trait to define what happens to a delivered message. The
/// handler is backend-agnostic; the backend decides what a failure means
/// (the NSQ worker requeues the message after a fixed delay).
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{Handler, Message, ProcessingError};
/// use async_trait::async_trait;
///
/// struct SignupHandler {
///     mailer: Arc<Mailer>,
/// }
///
/// #[async_trait]
/// impl Handler for SignupHandler {
///     async fn handle(&self, message: &Message) -> Result<(), ProcessingError> {
///         let signup: Signup = message.json()?;
///         self.mailer
///             .send_welcome(&signup.email)
///             .await
///             .map_err(|e| ProcessingError::failed_with_source("welcome mail", e))
///     }
///
///     fn name(&self) -> &'static str {
///         "signup_handler"
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a message.
    ///
    /// * `Ok(())` - message is acknowledged
    /// * `Err(ProcessingError)` - message is redelivered later
    async fn handle(&self, message: &Message) -> Result<(), ProcessingError>;

    /// Handler name, used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F> {
    name: &'static str,
    f: F,
}

/// Wrap an async closure as a named [`Handler`].
///
/// ```rust,ignore
/// let handler = messaging::handler_fn("audit", |msg: Message| async move {
///     tracing::info!(bytes = msg.body.len(), "audit event");
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(name: &'static str, f: F) -> HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    HandlerFn { name, f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ProcessingError>> + Send + 'static,
{
    async fn handle(&self, message: &Message) -> Result<(), ProcessingError> {
        (self.f)(message.clone()).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// A handler that accepts everything (for testing).
#[derive(Debug, Clone, Default)]
pub struct NoOpHandler;

#[async_trait]
impl Handler for NoOpHandler {
    async fn handle(&self, _message: &Message) -> Result<(), ProcessingError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_handler"
    }
}

/// A handler that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingHandler {
    error_message: String,
}

impl FailingHandler {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
        }
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _message: &Message) -> Result<(), ProcessingError> {
        Err(ProcessingError::failed(&self.error_message))
    }

    fn name(&self) -> &'static str {
        "failing_handler"
    }
}
