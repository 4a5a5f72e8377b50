//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the price, status and subscription types with no
//! I/O. Everything here is plain Rust with serialization support.

/// Price, snapshot and connection-status types.
pub mod streaming;

/// Subscription registry (desired set and wire set).
pub mod subscription;
