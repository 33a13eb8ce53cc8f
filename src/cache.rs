// =============================================================================
// PRODUCT CACHE
// =============================================================================
// Read-through Redis cache for single product lookups.
//
//   GET /products/:id  ──> GET product:<id> ──hit──> response
//                                  │ miss
//                                  └──> database ──> SETEX product:<id> 300
//
// Every product or stock write deletes the key.
//
// LEARNING NOTES:
// - The cache is an optimisation only: Redis errors are logged and treated
//   as a miss, they never fail the request
// - ConnectionManager is cheap to clone and reconnects on its own
// =============================================================================

use std::time::Instant;

use redis::aio::ConnectionManager;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::metrics;
use crate::models::Product;

/// Lifetime of a cached product
pub const PRODUCT_TTL_SECS: u64 = 300;

pub fn product_key(id: Uuid) -> String {
    format!("product:{id}")
}

#[derive(Clone)]
pub struct ProductCache {
    redis: ConnectionManager,
}

impl ProductCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn get(&self, id: Uuid) -> Option<Product> {
        let start = Instant::now();
        let cached: Result<Option<String>, _> = redis::cmd("GET")
            .arg(product_key(id))
            .query_async(&mut self.redis.clone())
            .await;
        metrics::record_redis_operation("get", start.elapsed().as_secs_f64());

        match cached {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(product) => {
                    debug!(product_id = %id, "Product cache hit");
                    Some(product)
                }
                Err(e) => {
                    warn!(product_id = %id, error = %e, "Discarding unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Product cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, product: &Product) {
        let json = match serde_json::to_string(product) {
            Ok(json) => json,
            Err(e) => {
                warn!(product_id = %product.id, error = %e, "Product not cacheable");
                return;
            }
        };
        let start = Instant::now();
        let result: Result<(), _> = redis::cmd("SETEX")
            .arg(product_key(product.id))
            .arg(PRODUCT_TTL_SECS)
            .arg(json)
            .query_async(&mut self.redis.clone())
            .await;
        metrics::record_redis_operation("set", start.elapsed().as_secs_f64());
        if let Err(e) = result {
            warn!(error = %e, "Product cache write failed");
        }
    }

    pub async fn invalidate(&self, id: Uuid) {
        let start = Instant::now();
        let result: Result<(), _> = redis::cmd("DEL")
            .arg(product_key(id))
            .query_async(&mut self.redis.clone())
            .await;
        metrics::record_redis_operation("delete", start.elapsed().as_secs_f64());
        if let Err(e) = result {
            warn!(product_id = %id, error = %e, "Product cache invalidation failed");
        }
    }

    /// Drop the entries of every product in `ids`
    pub async fn invalidate_many(&self, ids: impl IntoIterator<Item = Uuid>) {
        for id in ids {
            self.invalidate(id).await;
        }
    }
}
