//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Price cache with snapshot persistence and update fan-out.
pub mod cache;

/// Configuration loading.
pub mod config;

/// WebSocket price feed client (codec, handshake, connection loop).
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Snapshot store adapters.
pub mod persistence;

/// OpenTelemetry tracing integration.
pub mod telemetry;
