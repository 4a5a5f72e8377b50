//! Prometheus Metrics Module
//!
//! Exposes client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Inbound messages by type, outbound subscription traffic
//! - **Connection**: Lifecycle state, reconnects, authentication failures
//! - **State**: Desired subscriptions and cached prices
//! - **Latency**: Price update processing time
//!
//! Recording is a no-op until [`init_metrics`] installs the recorder, so
//! library users that never call it pay nothing.
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_stream_messages_received_total",
        "Total messages received from the price feed by type"
    );
    describe_counter!(
        "price_stream_malformed_messages_total",
        "Total inbound messages that could not be decoded"
    );
    describe_counter!(
        "price_stream_subscription_messages_total",
        "Total subscribe/unsubscribe messages sent"
    );
    describe_counter!(
        "price_stream_subscription_symbols_total",
        "Total symbols carried by subscribe/unsubscribe messages"
    );

    describe_gauge!(
        "price_stream_connection_state",
        "Connection state (0=disconnected, 1=connecting, 2=authenticating, 3=authenticated)"
    );
    describe_counter!(
        "price_stream_reconnects_total",
        "Total scheduled reconnection attempts"
    );
    describe_counter!(
        "price_stream_auth_failures_total",
        "Total failed handshakes by reason"
    );

    describe_gauge!(
        "price_stream_subscriptions",
        "Number of symbols in the desired subscription set"
    );
    describe_gauge!(
        "price_stream_cached_prices",
        "Number of symbols with a known price"
    );
    describe_counter!(
        "price_stream_snapshot_save_failures_total",
        "Total failures persisting the price snapshot"
    );

    describe_histogram!(
        "price_stream_price_update_seconds",
        "Time to apply a price update, including persistence"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record an inbound message by wire type.
pub fn record_message_received(kind: &'static str) {
    counter!("price_stream_messages_received_total", "type" => kind).increment(1);
}

/// Record an inbound message that failed to decode.
pub fn record_malformed_message() {
    counter!("price_stream_malformed_messages_total").increment(1);
}

/// Record an outbound subscribe/unsubscribe message.
pub fn record_subscription_message(action: &'static str, symbols: usize) {
    counter!("price_stream_subscription_messages_total", "action" => action).increment(1);
    counter!("price_stream_subscription_symbols_total", "action" => action)
        .increment(u64::try_from(symbols).unwrap_or(u64::MAX));
}

/// Update the connection-state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_stream_connection_state").set(state.as_gauge());
}

/// Record a scheduled reconnect.
pub fn record_reconnect() {
    counter!("price_stream_reconnects_total").increment(1);
}

/// Record a failed handshake.
pub fn record_auth_failure(reason: &'static str) {
    counter!("price_stream_auth_failures_total", "reason" => reason).increment(1);
}

/// Update the desired-subscription gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(count: usize) {
    gauge!("price_stream_subscriptions").set(count as f64);
}

/// Update the cached-price gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_cached_prices(count: usize) {
    gauge!("price_stream_cached_prices").set(count as f64);
}

/// Record a failed snapshot write.
pub fn record_snapshot_save_failure() {
    counter!("price_stream_snapshot_save_failures_total").increment(1);
}

/// Record price update processing duration.
pub fn record_price_update_duration(duration: Duration) {
    histogram!("price_stream_price_update_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
