//! Feed Codec
//!
//! JSON encoding and decoding for the price feed.
//!
//! A frame holds either a single message object or an array of them. Each
//! element is routed by its `type` field; a bad element is reported on its
//! own without discarding the rest of the frame.

use crate::infrastructure::feed::messages::{
    AuthErrorMessage, AuthenticatedMessage, ChallengeMessage, ClientMessage, ErrorMessage,
    PriceUpdateMessage, ServerMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Message object has no `type` field.
    #[error("message has no type field")]
    MissingType,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// Returns one result per message in the frame. A frame that is not
    /// JSON at all yields a single error.
    #[must_use]
    pub fn decode(&self, text: &str) -> Vec<Result<ServerMessage, CodecError>> {
        let trimmed = text.trim();

        if !trimmed.starts_with('[') && !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return vec![Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {preview}..."
            )))];
        }

        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Array(values)) => {
                values.into_iter().map(|v| self.decode_value(v)).collect()
            }
            Ok(value) => vec![self.decode_value(value)],
            Err(e) => vec![Err(e.into())],
        }
    }

    /// Decode one message object.
    ///
    /// # Errors
    ///
    /// Returns an error if the `type` field is missing or unknown, or the
    /// fields do not match the message schema.
    pub fn decode_value(&self, value: serde_json::Value) -> Result<ServerMessage, CodecError> {
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {value}"
            )));
        }

        let msg_type = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(CodecError::MissingType)?;

        let message = match msg_type {
            "auth_required" => ServerMessage::AuthRequired,
            "challenge" => {
                let m: ChallengeMessage = serde_json::from_value(value)?;
                ServerMessage::Challenge(m)
            }
            "authenticated" => {
                let m: AuthenticatedMessage = serde_json::from_value(value)?;
                ServerMessage::Authenticated(m)
            }
            "auth_error" => {
                let m: AuthErrorMessage = serde_json::from_value(value)?;
                ServerMessage::AuthError(m)
            }
            "price_update" => {
                let m: PriceUpdateMessage = serde_json::from_value(value)?;
                ServerMessage::PriceUpdate(m)
            }
            "error" => {
                let m: ErrorMessage = serde_json::from_value(value)?;
                ServerMessage::Error(m)
            }
            other => return Err(CodecError::UnknownMessageType(other.to_string())),
        };

        Ok(message)
    }

    /// Encode a client message to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}
