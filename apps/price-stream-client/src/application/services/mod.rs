//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `StreamingClient`: Connection lifecycle, subscriptions, and price access

mod streaming_client;

pub use streaming_client::StreamingClient;
