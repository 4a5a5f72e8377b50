//! Price Feed Wire Messages
//!
//! JSON message types exchanged with the price server.
//!
//! # Message Types
//!
//! ## Server -> Client
//! - `auth_required`: Server demands a handshake
//! - `challenge`: Nonce and opaque challenge identifier
//! - `authenticated`: Handshake complete, carries a session token
//! - `auth_error`: Handshake rejected, carries a reason
//! - `price_update`: Last price for a symbol
//! - `error`: Application-level error, connection stays open
//!
//! ## Client -> Server
//! - `authenticate` (`request_challenge` / `challenge_response`)
//! - `subscribe` / `unsubscribe`
//!
//! Every server message carries a `type` discriminator; every client message
//! carries an `action`.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::domain::streaming::Symbol;

// =============================================================================
// Inbound Messages (Server -> Client)
// =============================================================================

/// Challenge issued by the server.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "challenge", "challenge": "abc", "challenge_id": "1"}
/// ```
///
/// Some servers send the nonce as `nonce`; both names are accepted. The
/// identifier is opaque and echoed back exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChallengeMessage {
    /// Server nonce.
    #[serde(alias = "nonce")]
    pub challenge: String,

    /// Opaque challenge identifier (string or number).
    #[serde(default)]
    pub challenge_id: serde_json::Value,
}

/// Successful handshake.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "authenticated", "session_token": "..."}
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AuthenticatedMessage {
    /// Opaque session token.
    #[serde(default)]
    pub session_token: Option<String>,
}

impl fmt::Debug for AuthenticatedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedMessage")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Rejected handshake.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "auth_error", "message": "invalid signature"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthErrorMessage {
    /// Human-readable reason.
    #[serde(default)]
    pub message: String,
}

/// Price update for one symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "price_update", "symbol": "AAPL", "price": 187.23, "timestamp": 1718000000000}
/// ```
///
/// `price` may be a JSON number or a decimal string. `timestamp` is optional
/// and may be epoch milliseconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriceUpdateMessage {
    /// Instrument symbol.
    pub symbol: Symbol,

    /// Last price.
    pub price: Decimal,

    /// Server observation time.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Application error reported by the server.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "error", "message": "symbol limit exceeded"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Any message the server can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Server demands a handshake.
    AuthRequired,
    /// Challenge to sign.
    Challenge(ChallengeMessage),
    /// Handshake accepted.
    Authenticated(AuthenticatedMessage),
    /// Handshake rejected.
    AuthError(AuthErrorMessage),
    /// Price update.
    PriceUpdate(PriceUpdateMessage),
    /// Application error.
    Error(ErrorMessage),
}

impl ServerMessage {
    /// Wire name of the message type.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::Challenge(_) => "challenge",
            Self::Authenticated(_) => "authenticated",
            Self::AuthError(_) => "auth_error",
            Self::PriceUpdate(_) => "price_update",
            Self::Error(_) => "error",
        }
    }

    /// Check if the message belongs to the handshake.
    ///
    /// Handshake messages are consumed by the authenticator and never reach
    /// the general dispatcher.
    #[must_use]
    pub const fn is_auth_phase(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::Challenge(_) | Self::Authenticated(_) | Self::AuthError(_)
        )
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid epoch timestamp: {n}"))),
        Some(serde_json::Value::String(s)) => {
            if let Ok(millis) = s.parse::<i64>() {
                return DateTime::from_timestamp_millis(millis)
                    .map(Some)
                    .ok_or_else(|| de::Error::custom(format!("invalid epoch timestamp: {s}")));
            }
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(de::Error::custom)
        }
        Some(other) => Err(de::Error::custom(format!("invalid timestamp: {other}"))),
    }
}

// =============================================================================
// Outbound Messages (Client -> Server)
// =============================================================================

/// Handshake payload carried by an `authenticate` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthData {
    /// Ask the server for a challenge.
    RequestChallenge {
        /// Credential identifier.
        api_key: String,
    },
    /// Signed answer to a challenge.
    ChallengeResponse {
        /// Identifier echoed from the challenge.
        challenge_id: serde_json::Value,
        /// `base64(sha256(challenge + ":" + api_key))`.
        signature: String,
        /// Credential identifier.
        api_key: String,
    },
}

/// Any message the client can send.
///
/// # Wire Format (JSON)
/// ```json
/// {"action": "authenticate", "auth_data": {"type": "request_challenge", "api_key": "..."}}
/// {"action": "subscribe", "symbols": ["AAPL", "MSFT"]}
/// {"action": "unsubscribe", "symbols": ["MSFT"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake step.
    Authenticate {
        /// Handshake payload.
        auth_data: AuthData,
    },
    /// Start streaming symbols.
    Subscribe {
        /// Symbols to add.
        symbols: Vec<Symbol>,
    },
    /// Stop streaming symbols.
    Unsubscribe {
        /// Symbols to remove.
        symbols: Vec<Symbol>,
    },
}

impl ClientMessage {
    /// Create a challenge request.
    #[must_use]
    pub fn request_challenge(api_key: impl Into<String>) -> Self {
        Self::Authenticate {
            auth_data: AuthData::RequestChallenge {
                api_key: api_key.into(),
            },
        }
    }

    /// Create a signed challenge response.
    #[must_use]
    pub fn challenge_response(
        challenge_id: serde_json::Value,
        signature: String,
        api_key: impl Into<String>,
    ) -> Self {
        Self::Authenticate {
            auth_data: AuthData::ChallengeResponse {
                challenge_id,
                signature,
                api_key: api_key.into(),
            },
        }
    }

    /// Wire name of the action.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}
