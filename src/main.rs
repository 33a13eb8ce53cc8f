// =============================================================================
// STOREFRONT SERVICE - Main Entry Point
// =============================================================================
// This is the main entry point for the Rust-based Storefront Service.
//
// WHAT THIS SERVICE DOES:
// - Serves the product catalog (products, categories, stock)
// - Keeps a cart per user and turns it into an order at checkout
// - Charges orders through a simulated payment gateway
// - Exposes Prometheus metrics and rate limits every route
//
// LEARNING GOALS:
// - Understand Rust async programming with Tokio
// - Learn Axum web framework patterns (state, extractors, middleware)
// - See how transactions keep stock and orders consistent
// - Understand error handling in Rust
// =============================================================================

// -----------------------------------------------------------------------------
// MODULE DECLARATIONS
// -----------------------------------------------------------------------------
mod auth; // Passwords, tokens, extractors (auth/)
mod cache; // Redis product cache (cache.rs)
mod clock; // Injectable time source (clock.rs)
mod config; // Configuration loading (config.rs)
mod db; // PostgreSQL storage (db.rs)
mod error; // Error types (error.rs)
mod handlers; // HTTP request handlers (handlers/)
mod metrics; // Prometheus metrics setup (metrics.rs)
mod models; // Data structures (models/)
mod rate_limit; // Per-client request limits (rate_limit.rs)
mod services; // Business logic (services/)
mod store; // Storage traits (store/)

// -----------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::auth::JwtService;
use crate::cache::ProductCache;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::Database;
use crate::metrics::setup_metrics;
use crate::rate_limit::RateLimiter;
use crate::services::{
    AuthService, CartService, CatalogService, Notifier, OrderService, PaymentGateway,
    SimulatedGateway, SimulatedMailer,
};

// -----------------------------------------------------------------------------
// APPLICATION STATE
// -----------------------------------------------------------------------------
// Shared by every request handler through State<Arc<AppState>>.
//
// LEARNING NOTE:
// The gateway and the mailer are trait objects, so a different payment
// processor or mail transport only changes the line that builds them.
pub struct AppState {
    pub db: Database,
    pub redis: redis::aio::ConnectionManager,
    pub cache: ProductCache,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
    pub config: Config,
    pub jwt: JwtService,
    pub gateway: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Notifier>,
    pub clock: SystemClock,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn auth(&self) -> AuthService<'_, Database> {
        AuthService::new(&self.db, &self.jwt, &self.clock)
    }

    pub fn catalog(&self) -> CatalogService<'_, Database> {
        CatalogService::new(&self.db, &self.clock)
    }

    pub fn carts(&self) -> CartService<'_, Database> {
        CartService::new(&self.db, &self.clock)
    }

    pub fn orders(&self) -> OrderService<'_, Database> {
        OrderService::new(&self.db, self.gateway.as_ref(), &self.clock)
    }
}

// -----------------------------------------------------------------------------
// ROUTES
// -----------------------------------------------------------------------------
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // ----- Auth -----
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/refresh", post(handlers::auth::refresh))
        // ----- Categories -----
        .route(
            "/categories",
            get(handlers::catalog::list_categories).post(handlers::catalog::create_category),
        )
        .route("/categories/active", get(handlers::catalog::active_categories))
        .route(
            "/categories/slug/:slug",
            get(handlers::catalog::get_category_by_slug),
        )
        .route(
            "/categories/:id",
            get(handlers::catalog::get_category)
                .put(handlers::catalog::update_category)
                .delete(handlers::catalog::delete_category),
        )
        // ----- Products -----
        .route(
            "/products",
            get(handlers::catalog::list_products).post(handlers::catalog::create_product),
        )
        .route("/products/featured", get(handlers::catalog::featured_products))
        .route("/products/search", get(handlers::catalog::search_products))
        .route("/products/low-stock", get(handlers::catalog::low_stock_products))
        .route(
            "/products/slug/:slug",
            get(handlers::catalog::get_product_by_slug),
        )
        .route("/products/sku/:sku", get(handlers::catalog::get_product_by_sku))
        .route(
            "/products/:id",
            get(handlers::catalog::get_product)
                .put(handlers::catalog::update_product)
                .delete(handlers::catalog::delete_product),
        )
        .route("/products/:id/stock", patch(handlers::catalog::update_stock))
        // ----- Cart -----
        .route("/cart", get(handlers::cart::get_cart))
        .route("/cart/summary", get(handlers::cart::get_summary))
        .route("/cart/add", post(handlers::cart::add_item))
        .route(
            "/cart/items/:product_id",
            put(handlers::cart::update_item).delete(handlers::cart::remove_item),
        )
        .route("/cart/clear", axum::routing::delete(handlers::cart::clear_cart))
        // ----- Orders -----
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/checkout", post(handlers::orders::checkout))
        .route("/orders/payment/methods", get(handlers::orders::payment_methods))
        .route("/orders/admin/all", get(handlers::orders::admin_list_orders))
        .route(
            "/orders/admin/:id",
            get(handlers::orders::admin_get_order).put(handlers::orders::admin_update_order),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/pay", post(handlers::orders::pay_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        // ----- Rate limiting -----
        .route("/rate-limit/status", get(handlers::rate_limit_status))
}

// -----------------------------------------------------------------------------
// MAIN FUNCTION
// -----------------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -------------------------------------------------------------------------
    // STEP 1: Load environment variables
    // -------------------------------------------------------------------------
    dotenvy::dotenv().ok(); // .ok() ignores errors (file might not exist)

    // -------------------------------------------------------------------------
    // STEP 2: Initialize logging/tracing
    // -------------------------------------------------------------------------
    // RUST_LOG controls log levels, e.g. RUST_LOG=info,storefront_service=debug
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,storefront_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting Storefront Service...");

    // -------------------------------------------------------------------------
    // STEP 3: Load configuration
    // -------------------------------------------------------------------------
    let config = Config::from_env()?;
    info!(
        port = config.port,
        rate_limit = config.rate_limit_enabled,
        payment_delay = config.payment_simulate_delay,
        "Configuration loaded"
    );

    // -------------------------------------------------------------------------
    // STEP 4: Set up Prometheus metrics
    // -------------------------------------------------------------------------
    let metrics_handle = setup_metrics()?;
    info!("Prometheus metrics initialized");

    // -------------------------------------------------------------------------
    // STEP 5: Connect to PostgreSQL and prepare the schema
    // -------------------------------------------------------------------------
    let db = Database::connect(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    db.run_migrations(config.seed_sample_data).await?;
    info!("Database migrations completed");

    // -------------------------------------------------------------------------
    // STEP 6: Connect to Redis
    // -------------------------------------------------------------------------
    // ConnectionManager handles reconnection automatically
    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    info!("Connected to Redis");

    // -------------------------------------------------------------------------
    // STEP 7: Create application state
    // -------------------------------------------------------------------------
    let state = Arc::new(AppState {
        jwt: JwtService::new(&config.jwt_secret, config.access_token_expire_minutes),
        gateway: Arc::new(SimulatedGateway::new(config.payment_simulate_delay)),
        mailer: Arc::new(SimulatedMailer::new()),
        cache: ProductCache::new(redis_conn.clone()),
        limiter: RateLimiter::new(Some(redis_conn.clone()), config.rate_limit_enabled),
        clock: SystemClock,
        redis: redis_conn,
        metrics_handle,
        db,
        config,
    });

    // Optional admin bootstrap
    if let Some((email, password)) = state.config.admin_credentials() {
        match state.auth().ensure_admin(email, password).await {
            Ok(Some(_)) => {}
            Ok(None) => info!(email, "Admin account already present"),
            Err(e) => warn!(error = %e, "Admin bootstrap failed"),
        }
    }

    // -------------------------------------------------------------------------
    // STEP 8: Define routes
    // -------------------------------------------------------------------------
    // LEARNING NOTE:
    // route_layer only wraps matched routes, so the metrics middleware sees
    // MatchedPath ("/api/v1/orders/:id") instead of raw URIs. The rate
    // limiter is a plain layer and also counts requests to unknown paths.
    let app = Router::new()
        // ----- Health & Readiness Endpoints -----
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // ----- Metrics Endpoint -----
        .route("/metrics", get(handlers::metrics_handler))
        // ----- Storefront API -----
        .nest("/api/v1", api_routes())
        // ----- Middleware Layers -----
        .route_layer(middleware::from_fn(metrics::track_http))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // -------------------------------------------------------------------------
    // STEP 9: Start the HTTP server
    // -------------------------------------------------------------------------
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Storefront Service is listening");

    // Connect info gives the rate limiter the peer address
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
