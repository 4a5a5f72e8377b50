//! Price Feed Authentication
//!
//! Challenge-response handshake run over an already-open transport.
//!
//! # Authentication Flow
//!
//! 1. Receive `{"type":"auth_required"}` from server
//! 2. Send `{"action":"authenticate","auth_data":{"type":"request_challenge","api_key":"..."}}`
//! 3. Receive `{"type":"challenge","challenge":"...","challenge_id":...}`
//! 4. Send `challenge_response` with `signature = base64(sha256(challenge + ":" + api_key))`
//! 5. Receive `{"type":"authenticated","session_token":"..."}` or `{"type":"auth_error",...}`
//!
//! Without a credential the handshake is skipped entirely and no traffic is
//! sent. With one, the exchange must finish within the configured timeout.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;

use super::codec::{CodecError, FeedCodec};
use super::messages::{ClientMessage, ServerMessage};
use crate::domain::streaming::StatusError;

// =============================================================================
// Constants
// =============================================================================

/// Default bound on a full handshake.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Another handshake is still running on this authenticator.
    #[error("handshake already in progress")]
    HandshakeInProgress,

    /// Server answered with `auth_error`.
    #[error("authentication rejected: {0}")]
    Rejected(String),

    /// No terminal message arrived in time.
    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failed mid-handshake.
    #[error("transport error during handshake: {0}")]
    Transport(String),

    /// Transport closed mid-handshake.
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// Outbound message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl AuthError {
    /// Map the error to the status surface.
    #[must_use]
    pub fn to_status(&self) -> StatusError {
        match self {
            Self::Rejected(reason) => StatusError::AuthRejected(reason.clone()),
            Self::Timeout(_) => StatusError::AuthTimeout,
            other => StatusError::Transport(other.to_string()),
        }
    }

    /// Short label used as a metric dimension.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::HandshakeInProgress => "in_progress",
            Self::Rejected(_) => "rejected",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) | Self::ConnectionClosed => "transport",
            Self::Codec(_) => "codec",
        }
    }
}

// =============================================================================
// Credentials & Session
// =============================================================================

/// Feed credential.
///
/// `Debug` redacts the key for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create credentials. Returns `None` for a blank key, meaning the
    /// endpoint needs no authentication.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Option<Self> {
        let api_key = api_key.into();
        let trimmed = api_key.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self {
                api_key: trimmed.to_string(),
            })
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Authenticated session. Memory only; cleared with the transport.
#[derive(Clone)]
pub struct Session {
    token: Option<String>,
    established_at: DateTime<Utc>,
}

impl Session {
    fn new(token: Option<String>) -> Self {
        Self {
            token,
            established_at: Utc::now(),
        }
    }

    /// Get the session token, if the server issued one.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// When the handshake completed.
    #[must_use]
    pub const fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("established_at", &self.established_at)
            .finish()
    }
}

/// Result of a completed handshake.
#[derive(Debug, Default)]
pub struct AuthOutcome {
    /// Session, or `None` when no credential is configured.
    pub session: Option<Session>,
    /// Non-handshake messages that arrived mid-handshake, in arrival order.
    pub deferred: Vec<ServerMessage>,
}

/// Sign a challenge: `base64(sha256(challenge + ":" + api_key))`, standard
/// alphabet with padding.
#[must_use]
pub fn sign_challenge(challenge: &str, api_key: &str) -> String {
    let digest = Sha256::digest(format!("{challenge}:{api_key}").as_bytes());
    STANDARD.encode(digest)
}

// =============================================================================
// Authenticator
// =============================================================================

struct HandshakeGuard<'a>(&'a AtomicBool);

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the handshake. At most one handshake is in flight at a time.
#[derive(Debug)]
pub struct Authenticator {
    credentials: Option<Credentials>,
    timeout: Duration,
    in_progress: AtomicBool,
    codec: FeedCodec,
}

impl Authenticator {
    /// Create an authenticator.
    #[must_use]
    pub const fn new(credentials: Option<Credentials>, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
            in_progress: AtomicBool::new(false),
            codec: FeedCodec::new(),
        }
    }

    /// Check if a credential is configured.
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        self.credentials.is_some()
    }

    /// Check if a handshake is running.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Get the handshake timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn acquire(&self) -> Result<HandshakeGuard<'_>, AuthError> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::HandshakeInProgress)?;
        Ok(HandshakeGuard(&self.in_progress))
    }

    /// Authenticate over an open transport.
    ///
    /// Returns immediately without traffic when no credential is set.
    /// The in-progress flag is released on every exit path, including
    /// timeout and cancellation of the returned future. On error the caller
    /// is expected to drop the transport.
    ///
    /// # Errors
    ///
    /// - [`AuthError::HandshakeInProgress`] if another handshake is running
    /// - [`AuthError::Rejected`] on `auth_error`
    /// - [`AuthError::Timeout`] if no terminal message arrives in time
    /// - [`AuthError::Transport`] / [`AuthError::ConnectionClosed`] if the
    ///   transport fails
    pub async fn authenticate<W, R, E>(
        &self,
        sink: &mut W,
        stream: &mut R,
    ) -> Result<AuthOutcome, AuthError>
    where
        W: Sink<Message> + Unpin,
        W::Error: fmt::Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let Some(credentials) = &self.credentials else {
            return Ok(AuthOutcome::default());
        };

        let _guard = self.acquire()?;

        tokio::time::timeout(self.timeout, self.handshake(credentials, sink, stream))
            .await
            .unwrap_or_else(|_| Err(AuthError::Timeout(self.timeout)))
    }

    async fn handshake<W, R, E>(
        &self,
        credentials: &Credentials,
        sink: &mut W,
        stream: &mut R,
    ) -> Result<AuthOutcome, AuthError>
    where
        W: Sink<Message> + Unpin,
        W::Error: fmt::Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: fmt::Display,
    {
        let mut deferred = Vec::new();

        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => return Err(AuthError::ConnectionClosed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(AuthError::Transport(e.to_string())),
            };

            let mut session = None;

            for decoded in self.codec.decode(&text) {
                let message = match decoded {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed message during handshake");
                        continue;
                    }
                };

                match message {
                    ServerMessage::AuthRequired if session.is_none() => {
                        tracing::debug!("Server requires authentication, requesting challenge");
                        self.send(sink, &ClientMessage::request_challenge(credentials.api_key()))
                            .await?;
                    }
                    ServerMessage::Challenge(challenge) if session.is_none() => {
                        tracing::debug!("Received challenge, sending response");
                        let signature = sign_challenge(&challenge.challenge, credentials.api_key());
                        let response = ClientMessage::challenge_response(
                            challenge.challenge_id,
                            signature,
                            credentials.api_key(),
                        );
                        self.send(sink, &response).await?;
                    }
                    ServerMessage::Authenticated(msg) if session.is_none() => {
                        session = Some(Session::new(msg.session_token));
                    }
                    ServerMessage::AuthError(msg) if session.is_none() => {
                        return Err(AuthError::Rejected(msg.message));
                    }
                    other if other.is_auth_phase() => {
                        tracing::debug!(kind = other.kind(), "Dropping handshake message after success");
                    }
                    other => deferred.push(other),
                }
            }

            if let Some(session) = session {
                return Ok(AuthOutcome {
                    session: Some(session),
                    deferred,
                });
            }
        }
    }

    async fn send<W>(&self, sink: &mut W, message: &ClientMessage) -> Result<(), AuthError>
    where
        W: Sink<Message> + Unpin,
        W::Error: fmt::Display,
    {
        let json = self.codec.encode(message)?;
        sink.send(Message::Text(json.into()))
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))
    }
}
