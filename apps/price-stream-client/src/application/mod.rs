//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the client facade and the port interfaces that
//! define how the core interacts with external systems.

/// Port interfaces for external systems (snapshot persistence).
pub mod ports;

/// Application services (the streaming client facade).
pub mod services;
