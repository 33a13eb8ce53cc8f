// =============================================================================
// CATALOG SERVICE
// =============================================================================
// Products and categories. Writes are admin-only at the HTTP layer; this
// service only enforces the data rules:
//   - SKU and slug are unique across products, name and slug across categories
//   - a product may only point at an existing category
//   - price relationships hold after every write
//   - a category with products can't be deleted
// =============================================================================

use tracing::info;
use uuid::Uuid;
use validator::ValidationError;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{
    Category, CategoryPatch, CategoryView, ListParams, NewCategory, NewProduct, Paginated,
    Product, ProductFilters, ProductPatch, ProductView, StockUpdate,
};
use crate::store::{Storage, Store};

/// Default and maximum size of the featured list
pub const FEATURED_LIMIT: i64 = 10;
pub const MAX_FEATURED_LIMIT: i64 = 50;

/// Default and maximum size of search results
pub const SEARCH_LIMIT: i64 = 20;
pub const MAX_SEARCH_LIMIT: i64 = 50;

/// Default and maximum size of the low stock report
pub const LOW_STOCK_LIMIT: i64 = 50;
pub const MAX_LOW_STOCK_LIMIT: i64 = 100;

pub struct CatalogService<'a, S: Storage> {
    storage: &'a S,
    clock: &'a dyn Clock,
}

fn product_not_found() -> AppError {
    AppError::NotFound("Product not found".to_string())
}

fn category_not_found() -> AppError {
    AppError::NotFound("Category not found".to_string())
}

fn price_error(error: ValidationError) -> AppError {
    let message = error
        .message
        .map(|m| m.into_owned())
        .unwrap_or_else(|| "invalid price".to_string());
    AppError::Validation(format!("{}: {}", error.code, message))
}

fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

async fn ensure_product_unique<T: Store>(
    tx: &mut T,
    sku: &str,
    slug: &str,
    exclude: Option<Uuid>,
) -> AppResult<()> {
    if !tx.product_taken(sku, slug, exclude).await? {
        return Ok(());
    }
    let sku_clash = tx
        .find_product_by_sku(sku)
        .await?
        .is_some_and(|p| Some(p.id) != exclude);
    let field = if sku_clash { "SKU" } else { "slug" };
    Err(AppError::Conflict(format!(
        "Product with this {field} already exists"
    )))
}

async fn ensure_category_unique<T: Store>(
    tx: &mut T,
    name: &str,
    slug: &str,
    exclude: Option<Uuid>,
) -> AppResult<()> {
    if !tx.category_taken(name, slug, exclude).await? {
        return Ok(());
    }
    let slug_clash = tx
        .find_category_by_slug(slug)
        .await?
        .is_some_and(|c| Some(c.id) != exclude);
    let field = if slug_clash { "slug" } else { "name" };
    Err(AppError::Conflict(format!(
        "Category with this {field} already exists"
    )))
}

async fn ensure_category_exists<T: Store>(tx: &mut T, category_id: Option<Uuid>) -> AppResult<()> {
    if let Some(id) = category_id {
        if tx.find_category(id).await?.is_none() {
            return Err(AppError::Validation(
                "category_id: Category not found".to_string(),
            ));
        }
    }
    Ok(())
}

impl<'a, S: Storage> CatalogService<'a, S> {
    pub fn new(storage: &'a S, clock: &'a dyn Clock) -> Self {
        Self { storage, clock }
    }

    // =========================================================================
    // PRODUCTS
    // =========================================================================

    pub async fn create_product(&self, new: &NewProduct) -> AppResult<Product> {
        crate::models::check_price_relationships(new.price, new.compare_price, new.cost_price)
            .map_err(price_error)?;

        let mut tx = self.storage.begin().await?;
        ensure_product_unique(&mut tx, &new.sku, &new.slug, None).await?;
        ensure_category_exists(&mut tx, new.category_id).await?;
        let product = tx.insert_product(new, self.clock.now()).await?;
        tx.commit().await?;

        metrics::set_stock_level(&product.sku, product.stock_quantity);
        info!(product_id = %product.id, sku = %product.sku, "Product created");
        Ok(product)
    }

    pub async fn get_product(&self, id: Uuid) -> AppResult<Product> {
        let mut tx = self.storage.begin().await?;
        let product = tx.find_product(id).await?.ok_or_else(product_not_found)?;
        tx.commit().await?;
        Ok(product)
    }

    pub async fn get_product_by_slug(&self, slug: &str) -> AppResult<Product> {
        let mut tx = self.storage.begin().await?;
        let product = tx
            .find_product_by_slug(slug)
            .await?
            .ok_or_else(product_not_found)?;
        tx.commit().await?;
        Ok(product)
    }

    pub async fn get_product_by_sku(&self, sku: &str) -> AppResult<Product> {
        let mut tx = self.storage.begin().await?;
        let product = tx
            .find_product_by_sku(sku)
            .await?
            .ok_or_else(product_not_found)?;
        tx.commit().await?;
        Ok(product)
    }

    /// Filtered, paginated product list
    pub async fn list_products(&self, filters: &ProductFilters) -> AppResult<Paginated<ProductView>> {
        filters.check().map_err(AppError::Validation)?;
        let params = filters.list_params();

        let mut tx = self.storage.begin().await?;
        let (products, total) = tx
            .list_products(filters, params.offset(), params.limit())
            .await?;
        tx.commit().await?;

        let items = products.into_iter().map(ProductView::from).collect();
        Ok(Paginated::new(items, total, params))
    }

    pub async fn featured_products(&self, limit: Option<i64>) -> AppResult<Vec<ProductView>> {
        let limit = clamp_limit(limit, FEATURED_LIMIT, MAX_FEATURED_LIMIT);
        let mut tx = self.storage.begin().await?;
        let products = tx.featured_products(limit).await?;
        tx.commit().await?;
        Ok(products.into_iter().map(ProductView::from).collect())
    }

    /// Active products at or below their threshold; also refreshes the gauge
    pub async fn low_stock_products(&self, limit: Option<i64>) -> AppResult<Vec<ProductView>> {
        let limit = clamp_limit(limit, LOW_STOCK_LIMIT, MAX_LOW_STOCK_LIMIT);
        let mut tx = self.storage.begin().await?;
        let mut products = tx.low_stock_products().await?;
        tx.commit().await?;

        metrics::set_low_stock_count(products.len());
        products.truncate(limit as usize);
        Ok(products.into_iter().map(ProductView::from).collect())
    }

    /// Case-insensitive match over name, description and SKU of active products
    pub async fn search_products(&self, term: &str, limit: Option<i64>) -> AppResult<Vec<ProductView>> {
        let filters = ProductFilters {
            search: Some(term.to_string()),
            ..ProductFilters::default()
        };
        filters.check().map_err(AppError::Validation)?;
        let limit = clamp_limit(limit, SEARCH_LIMIT, MAX_SEARCH_LIMIT);

        let mut tx = self.storage.begin().await?;
        let (products, _) = tx.list_products(&filters, 0, limit).await?;
        tx.commit().await?;
        Ok(products.into_iter().map(ProductView::from).collect())
    }

    pub async fn update_product(&self, id: Uuid, patch: ProductPatch) -> AppResult<Product> {
        let mut tx = self.storage.begin().await?;
        let mut product = tx.find_product(id).await?.ok_or_else(product_not_found)?;

        if patch.sku.is_some() || patch.slug.is_some() {
            let sku = patch.sku.as_deref().unwrap_or(&product.sku);
            let slug = patch.slug.as_deref().unwrap_or(&product.slug);
            ensure_product_unique(&mut tx, sku, slug, Some(id)).await?;
        }
        ensure_category_exists(&mut tx, patch.category_id).await?;

        product.apply_patch(patch);
        product.check_prices().map_err(price_error)?;
        product.updated_at = self.clock.now();
        tx.update_product(&product).await?;
        tx.commit().await?;

        metrics::set_stock_level(&product.sku, product.stock_quantity);
        info!(product_id = %product.id, "Product updated");
        Ok(product)
    }

    /// Admin stock correction
    pub async fn update_stock(&self, id: Uuid, update: &StockUpdate) -> AppResult<Product> {
        if update.stock_quantity < 0 || update.low_stock_threshold.is_some_and(|t| t < 0) {
            return Err(AppError::Validation(
                "stock_quantity: Stock values cannot be negative".to_string(),
            ));
        }

        let mut tx = self.storage.begin().await?;
        let mut product = tx.find_product(id).await?.ok_or_else(product_not_found)?;
        product.stock_quantity = update.stock_quantity;
        if let Some(threshold) = update.low_stock_threshold {
            product.low_stock_threshold = threshold;
        }
        product.updated_at = self.clock.now();
        tx.update_product(&product).await?;
        tx.commit().await?;

        metrics::set_stock_level(&product.sku, product.stock_quantity);
        info!(
            product_id = %product.id,
            stock = product.stock_quantity,
            low_stock = product.is_low_stock(),
            "Stock updated"
        );
        Ok(product)
    }

    pub async fn delete_product(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.storage.begin().await?;
        if !tx.delete_product(id).await? {
            return Err(product_not_found());
        }
        tx.commit().await?;
        info!(product_id = %id, "Product deleted");
        Ok(())
    }

    // =========================================================================
    // CATEGORIES
    // =========================================================================

    pub async fn create_category(&self, new: &NewCategory) -> AppResult<Category> {
        let mut tx = self.storage.begin().await?;
        ensure_category_unique(&mut tx, &new.name, &new.slug, None).await?;
        let category = tx.insert_category(new, self.clock.now()).await?;
        tx.commit().await?;
        info!(category_id = %category.id, slug = %category.slug, "Category created");
        Ok(category)
    }

    pub async fn list_categories(
        &self,
        params: ListParams,
        active_only: bool,
    ) -> AppResult<Paginated<CategoryView>> {
        let params = params.normalized();
        let mut tx = self.storage.begin().await?;
        let (items, total) = tx
            .list_categories(active_only, params.offset(), params.limit())
            .await?;
        tx.commit().await?;
        Ok(Paginated::new(items, total, params))
    }

    /// Every active category, unpaginated
    pub async fn active_categories(&self) -> AppResult<Vec<CategoryView>> {
        let mut tx = self.storage.begin().await?;
        let (items, _) = tx.list_categories(true, 0, i64::MAX).await?;
        tx.commit().await?;
        Ok(items)
    }

    pub async fn get_category(&self, id: Uuid) -> AppResult<CategoryView> {
        let mut tx = self.storage.begin().await?;
        let category = tx.find_category(id).await?.ok_or_else(category_not_found)?;
        let products_count = tx.count_category_products(id).await?;
        tx.commit().await?;
        Ok(CategoryView {
            category,
            products_count,
        })
    }

    pub async fn get_category_by_slug(&self, slug: &str) -> AppResult<CategoryView> {
        let mut tx = self.storage.begin().await?;
        let category = tx
            .find_category_by_slug(slug)
            .await?
            .ok_or_else(category_not_found)?;
        let products_count = tx.count_category_products(category.id).await?;
        tx.commit().await?;
        Ok(CategoryView {
            category,
            products_count,
        })
    }

    pub async fn update_category(&self, id: Uuid, patch: CategoryPatch) -> AppResult<Category> {
        let mut tx = self.storage.begin().await?;
        let mut category = tx.find_category(id).await?.ok_or_else(category_not_found)?;

        if patch.name.is_some() || patch.slug.is_some() {
            let name = patch.name.as_deref().unwrap_or(&category.name);
            let slug = patch.slug.as_deref().unwrap_or(&category.slug);
            ensure_category_unique(&mut tx, name, slug, Some(id)).await?;
        }

        category.apply_patch(patch);
        category.updated_at = self.clock.now();
        tx.update_category(&category).await?;
        tx.commit().await?;
        Ok(category)
    }

    pub async fn delete_category(&self, id: Uuid) -> AppResult<()> {
        let mut tx = self.storage.begin().await?;
        if tx.find_category(id).await?.is_none() {
            return Err(category_not_found());
        }
        if tx.count_category_products(id).await? > 0 {
            return Err(AppError::Conflict(
                "Cannot delete category with associated products".to_string(),
            ));
        }
        tx.delete_category(id).await?;
        tx.commit().await?;
        info!(category_id = %id, "Category deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DEFAULT_LOW_STOCK_THRESHOLD;
    use crate::services::testing::{seed_product, Fixture};
    use rust_decimal::Decimal;

    fn catalog(fx: &Fixture) -> CatalogService<'_, crate::store::memory::MemoryStorage> {
        CatalogService::new(&fx.storage, &fx.clock)
    }

    fn new_category(name: &str, slug: &str) -> NewCategory {
        NewCategory {
            name: name.to_string(),
            description: None,
            slug: slug.to_string(),
            is_active: true,
        }
    }

    fn new_product(sku: &str, slug: &str, category_id: Option<Uuid>) -> NewProduct {
        NewProduct {
            name: "Wireless Headphones".to_string(),
            description: Some("Over-ear, noise cancelling".to_string()),
            slug: slug.to_string(),
            sku: sku.to_string(),
            price: Decimal::new(19999, 2),
            compare_price: Some(Decimal::new(24999, 2)),
            cost_price: Some(Decimal::new(12000, 2)),
            stock_quantity: 25,
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            is_active: true,
            is_featured: false,
            category_id,
        }
    }

    #[tokio::test]
    async fn product_sku_and_slug_are_unique() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        svc.create_product(&new_product("WH-001", "wireless-headphones", None))
            .await
            .unwrap();

        let err = svc
            .create_product(&new_product("WH-001", "other-slug", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("SKU")));

        let err = svc
            .create_product(&new_product("WH-002", "wireless-headphones", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("slug")));
    }

    #[tokio::test]
    async fn product_category_must_exist() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let err = svc
            .create_product(&new_product("WH-001", "wh", Some(Uuid::new_v4())))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let audio = svc
            .create_category(&new_category("Audio", "audio"))
            .await
            .unwrap();
        let product = svc
            .create_product(&new_product("WH-001", "wh", Some(audio.id)))
            .await
            .unwrap();
        assert_eq!(product.category_id, Some(audio.id));
    }

    #[tokio::test]
    async fn updates_keep_price_relationships() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let product = svc
            .create_product(&new_product("WH-001", "wh", None))
            .await
            .unwrap();

        // Dropping the price below the cost price is refused
        let err = svc
            .update_product(
                product.id,
                ProductPatch {
                    price: Some(Decimal::new(10000, 2)),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(msg) if msg.starts_with("compare_price") || msg.starts_with("cost_price")));
        assert_eq!(svc.get_product(product.id).await.unwrap().price, product.price);

        let updated = svc
            .update_product(
                product.id,
                ProductPatch {
                    name: Some("Studio Headphones".to_string()),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Studio Headphones");
        assert_eq!(updated.sku, "WH-001");
    }

    #[tokio::test]
    async fn product_keeps_its_own_sku_on_update() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let a = svc
            .create_product(&new_product("WH-001", "a", None))
            .await
            .unwrap();
        svc.create_product(&new_product("WH-002", "b", None))
            .await
            .unwrap();

        svc.update_product(
            a.id,
            ProductPatch {
                sku: Some("WH-001".to_string()),
                ..ProductPatch::default()
            },
        )
        .await
        .unwrap();

        let err = svc
            .update_product(
                a.id,
                ProductPatch {
                    sku: Some("WH-002".to_string()),
                    ..ProductPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn lookups_by_slug_and_sku() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let product = svc
            .create_product(&new_product("WH-001", "wireless-headphones", None))
            .await
            .unwrap();

        assert_eq!(
            svc.get_product_by_slug("wireless-headphones").await.unwrap().id,
            product.id
        );
        assert_eq!(svc.get_product_by_sku("WH-001").await.unwrap().id, product.id);
        assert!(matches!(
            svc.get_product_by_sku("NOPE").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn list_rejects_inverted_price_window() {
        let fx = Fixture::new();
        let filters = ProductFilters {
            min_price: Some(Decimal::new(50, 0)),
            max_price: Some(Decimal::new(10, 0)),
            ..ProductFilters::default()
        };
        let err = catalog(&fx).list_products(&filters).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn list_and_search_only_show_active_products() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        svc.create_product(&new_product("WH-001", "wh-1", None))
            .await
            .unwrap();
        let hidden = svc
            .create_product(&new_product("WH-002", "wh-2", None))
            .await
            .unwrap();
        svc.update_product(
            hidden.id,
            ProductPatch {
                is_active: Some(false),
                ..ProductPatch::default()
            },
        )
        .await
        .unwrap();

        let page = svc.list_products(&ProductFilters::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].product.sku, "WH-001");
        assert!(page.items[0].is_on_sale);

        let hits = svc.search_products("wh-", Some(10)).await.unwrap();
        assert_eq!(hits.len(), 1);
        let hits = svc.search_products("noise", None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(svc.search_products("  ", None).await.is_err());
    }

    #[tokio::test]
    async fn stock_update_feeds_low_stock_report() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let plenty = seed_product(&fx.storage, Decimal::ONE, 100).await;
        let scarce = seed_product(&fx.storage, Decimal::ONE, 100).await;

        let updated = svc
            .update_stock(
                scarce.id,
                &StockUpdate {
                    stock_quantity: 3,
                    low_stock_threshold: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.stock_quantity, 3);
        assert!(updated.is_low_stock());

        let report = svc.low_stock_products(None).await.unwrap();
        let ids: Vec<Uuid> = report.iter().map(|p| p.product.id).collect();
        assert_eq!(ids, vec![scarce.id]);
        assert!(!ids.contains(&plenty.id));

        let err = svc
            .update_stock(
                scarce.id,
                &StockUpdate {
                    stock_quantity: -1,
                    low_stock_threshold: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn category_names_and_slugs_are_unique() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let audio = svc
            .create_category(&new_category("Audio", "audio"))
            .await
            .unwrap();

        let err = svc
            .create_category(&new_category("Audio", "sound"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("name")));

        let err = svc
            .create_category(&new_category("Sound", "audio"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg.contains("slug")));

        let renamed = svc
            .update_category(
                audio.id,
                CategoryPatch {
                    name: Some("Audio & Hi-Fi".to_string()),
                    ..CategoryPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.slug, "audio");
        assert_eq!(
            svc.get_category_by_slug("audio").await.unwrap().category.name,
            "Audio & Hi-Fi"
        );
    }

    #[tokio::test]
    async fn category_with_products_cannot_be_deleted() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        let audio = svc
            .create_category(&new_category("Audio", "audio"))
            .await
            .unwrap();
        let product = svc
            .create_product(&new_product("WH-001", "wh", Some(audio.id)))
            .await
            .unwrap();

        assert_eq!(svc.get_category(audio.id).await.unwrap().products_count, 1);
        let err = svc.delete_category(audio.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        svc.delete_product(product.id).await.unwrap();
        svc.delete_category(audio.id).await.unwrap();
        assert!(matches!(
            svc.get_category(audio.id).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn category_listing_pages_and_filters() {
        let fx = Fixture::new();
        let svc = catalog(&fx);
        for (name, slug) in [("Books", "books"), ("Audio", "audio"), ("Garden", "garden")] {
            svc.create_category(&new_category(name, slug)).await.unwrap();
        }
        let garden = svc.get_category_by_slug("garden").await.unwrap();
        svc.update_category(
            garden.category.id,
            CategoryPatch {
                is_active: Some(false),
                ..CategoryPatch::default()
            },
        )
        .await
        .unwrap();

        let page = svc
            .list_categories(ListParams { page: 1, per_page: 2 }, false)
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        let names: Vec<&str> = page.items.iter().map(|c| c.category.name.as_str()).collect();
        assert_eq!(names, vec!["Audio", "Books"]);

        let active = svc.active_categories().await.unwrap();
        assert_eq!(active.len(), 2);
    }
}
