//! Message handlers run by the service.

use messaging::{Handler, Message, ProcessingError, async_trait};
use tracing::info;

/// Logs every delivered message and acknowledges it.
///
/// JSON payloads are parsed so malformed ones are requeued instead of
/// silently acknowledged.
pub struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    async fn handle(&self, message: &Message) -> Result<(), ProcessingError> {
        if message.is_json() {
            let value: serde_json::Value = message.json()?;
            info!(
                attempts = message.attempts,
                redelivery = message.is_redelivery(),
                payload = %value,
                "Message received"
            );
        } else {
            info!(
                attempts = message.attempts,
                redelivery = message.is_redelivery(),
                content_type = %message.content_type,
                bytes = message.body.len(),
                "Message received"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging_handler"
    }
}
