//! Generic message record handed to handlers.

use crate::error::ProcessingError;
use serde::de::DeserializeOwned;

/// A message delivered by a queue backend.
///
/// Built fresh for every delivery from the backend's native message; handlers
/// never see backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Raw payload bytes
    pub body: Vec<u8>,
    /// Delivery attempt count (1 on first delivery)
    pub attempts: u32,
    /// Content type the subscriber was configured with
    pub content_type: String,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>, attempts: u32, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attempts,
            content_type: content_type.into(),
        }
    }

    /// Whether this message has been delivered before.
    pub fn is_redelivery(&self) -> bool {
        self.attempts > 1
    }

    /// Whether the content type is JSON (`application/json` or `*+json`).
    pub fn is_json(&self) -> bool {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "application/json" || essence.ends_with("+json")
    }

    /// Decode a JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ProcessingError> {
        if !self.is_json() {
            return Err(ProcessingError::UnsupportedContentType(
                self.content_type.clone(),
            ));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}
