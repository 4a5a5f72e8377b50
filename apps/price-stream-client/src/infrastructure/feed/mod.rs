//! Price Feed Adapter
//!
//! WebSocket client for the price server:
//!
//! - **messages**: Wire types for both directions
//! - **codec**: JSON framing (single object or batched array)
//! - **auth**: Challenge-response handshake
//! - **reconnect** / **heartbeat**: Transport recovery and liveness
//! - **connection**: The event loop that owns the transport

pub mod auth;
pub mod codec;
pub mod connection;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;

pub use auth::{AuthError, AuthOutcome, Authenticator, Credentials, Session, sign_challenge};
pub use codec::{CodecError, FeedCodec};
pub use connection::{ConnectOutcome, ConnectionError, ConnectionManager, ConnectionSettings};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use messages::{ClientMessage, ServerMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
