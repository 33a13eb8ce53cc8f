// =============================================================================
// METRICS MODULE
// =============================================================================
// This module sets up Prometheus metrics for observability.
//
// LEARNING NOTES:
// - Prometheus uses a "pull" model - it scrapes /metrics endpoint
// - Metrics have types: Counter, Gauge, Histogram
// - Labels add dimensions to metrics (e.g., endpoint="/api/v1/orders/:id")
//
// METRIC TYPES EXPLAINED:
// - Counter: Only goes up (requests, orders). Resets on restart.
// - Gauge: Can go up or down (stock level, low stock count).
// - Histogram: Distribution of values in buckets (latency percentiles).
// =============================================================================

use std::time::Instant;

use anyhow::Result;
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// METRIC NAMES (Constants)
// =============================================================================

/// HTTP request counter
/// Labels: method, endpoint (route template), status
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";

/// HTTP request duration histogram
/// Labels: method, endpoint
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Orders created from carts
pub const ORDERS_CREATED_TOTAL: &str = "orders_created_total";

/// Order status changes
/// Labels: from, to
pub const ORDER_STATUS_TRANSITIONS_TOTAL: &str = "order_status_transitions_total";

/// Gateway calls
/// Labels: method (credit_card, paypal, ...), status (completed/failed)
pub const PAYMENTS_TOTAL: &str = "payments_total";

/// Cart mutations
/// Labels: operation (add/update/remove/clear)
pub const CART_OPERATIONS_TOTAL: &str = "cart_operations_total";

/// Product stock level gauge
/// Labels: sku
pub const PRODUCT_STOCK_LEVEL: &str = "product_stock_level";

/// Active products at or below their low stock threshold
pub const PRODUCTS_LOW_STOCK: &str = "products_low_stock";

/// Time from BEGIN to COMMIT of a storage transaction
pub const DB_TRANSACTION_DURATION_SECONDS: &str = "db_transaction_duration_seconds";

/// Redis operation duration histogram
/// Labels: operation (get/set/delete/incr)
pub const REDIS_OPERATION_DURATION_SECONDS: &str = "redis_operation_duration_seconds";

/// Simulated emails
/// Labels: kind (welcome/order_confirmation), outcome (sent/failed)
pub const NOTIFICATIONS_SENT_TOTAL: &str = "notifications_sent_total";

/// Requests refused by the rate limiter
/// Labels: class
pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";

// =============================================================================
// SETUP FUNCTION
// =============================================================================
/// Initialize Prometheus metrics recorder
///
/// Installs the recorder globally and returns the handle used by the
/// /metrics endpoint to render the exposition text.
pub fn setup_metrics() -> Result<PrometheusHandle> {
    // -------------------------------------------------------------------------
    // HISTOGRAM BUCKETS
    // -------------------------------------------------------------------------
    // 1ms .. 10s. The upper buckets matter for /orders/:id/pay, which waits
    // on the (simulated) payment processor.
    let latency_buckets = &[
        0.001, // 1ms
        0.005, // 5ms
        0.01,  // 10ms
        0.025, // 25ms
        0.05,  // 50ms
        0.1,   // 100ms
        0.25,  // 250ms
        0.5,   // 500ms
        1.0,   // 1 second
        2.5,   // 2.5 seconds
        5.0,   // 5 seconds
        10.0,  // 10 seconds
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(DB_TRANSACTION_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .set_buckets_for_metric(
            Matcher::Full(REDIS_OPERATION_DURATION_SECONDS.to_string()),
            latency_buckets,
        )?
        .install_recorder()?;

    // -------------------------------------------------------------------------
    // METRIC DESCRIPTIONS
    // -------------------------------------------------------------------------
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency in seconds");
    describe_counter!(ORDERS_CREATED_TOTAL, "Total number of orders created from carts");
    describe_counter!(
        ORDER_STATUS_TRANSITIONS_TOTAL,
        "Order status changes by source and target status"
    );
    describe_counter!(PAYMENTS_TOTAL, "Payment attempts by method and outcome");
    describe_counter!(CART_OPERATIONS_TOTAL, "Cart mutations by operation");
    describe_gauge!(PRODUCT_STOCK_LEVEL, "Current stock level for each SKU");
    describe_gauge!(
        PRODUCTS_LOW_STOCK,
        "Number of active products at or below their low stock threshold"
    );
    describe_histogram!(
        DB_TRANSACTION_DURATION_SECONDS,
        "Database transaction duration in seconds"
    );
    describe_histogram!(
        REDIS_OPERATION_DURATION_SECONDS,
        "Redis operation latency in seconds"
    );
    describe_counter!(NOTIFICATIONS_SENT_TOTAL, "Notifications by kind and outcome");
    describe_counter!(
        RATE_LIMIT_REJECTIONS_TOTAL,
        "Requests rejected by the rate limiter"
    );

    Ok(handle)
}

// =============================================================================
// HTTP MIDDLEWARE
// =============================================================================
/// Count and time every request, labelled by route template
///
/// LEARNING NOTE:
/// MatchedPath gives "/api/v1/orders/:order_id" instead of the concrete
/// path, which keeps label cardinality bounded.
pub async fn track_http(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    record_http_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Record an HTTP request
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "endpoint" => endpoint.to_string()
    )
    .record(duration_secs);
}

pub fn record_order_created() {
    counter!(ORDERS_CREATED_TOTAL).increment(1);
}

pub fn record_status_transition(from: &str, to: &str) {
    counter!(
        ORDER_STATUS_TRANSITIONS_TOTAL,
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a gateway call
///
/// # Arguments
/// * `method` - Payment method name as sent by the client
/// * `status` - Gateway outcome (completed/failed)
pub fn record_payment(method: &str, status: &str) {
    counter!(
        PAYMENTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_cart_operation(operation: &'static str) {
    counter!(CART_OPERATIONS_TOTAL, "operation" => operation).increment(1);
}

/// Update stock level gauge for a SKU
pub fn set_stock_level(sku: &str, level: i32) {
    gauge!(PRODUCT_STOCK_LEVEL, "sku" => sku.to_string()).set(level as f64);
}

/// Update low stock products count
pub fn set_low_stock_count(count: usize) {
    gauge!(PRODUCTS_LOW_STOCK).set(count as f64);
}

pub fn record_db_transaction(duration_secs: f64) {
    histogram!(DB_TRANSACTION_DURATION_SECONDS).record(duration_secs);
}

/// Record Redis operation duration
///
/// # Arguments
/// * `operation` - Type of operation (get, set, delete, incr)
/// * `duration_secs` - Operation duration in seconds
pub fn record_redis_operation(operation: &'static str, duration_secs: f64) {
    histogram!(REDIS_OPERATION_DURATION_SECONDS, "operation" => operation).record(duration_secs);
}

pub fn record_notification(kind: &'static str, sent: bool) {
    let outcome = if sent { "sent" } else { "failed" };
    counter!(NOTIFICATIONS_SENT_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_rate_limit_rejection(class: &'static str) {
    counter!(RATE_LIMIT_REJECTIONS_TOTAL, "class" => class).increment(1);
}
