//! Storage seams.
//!
//! Each trait returns plain model structs. The multi-row workflows
//! (checkout, status transitions, stock adjustment, reviews) are trait
//! methods so every backend runs them as one atomic unit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use shared::catalog::ProductFilter;
use shared::order::CheckoutRequest;
use shared::{OrderStatus, Page, Principal};

use crate::error::AppResult;
use crate::models::*;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create_category(&self, new: NewCategory) -> AppResult<Category>;
    async fn get_category(&self, id: i32) -> AppResult<Option<Category>>;
    async fn get_category_by_slug(&self, slug: &str) -> AppResult<Option<Category>>;
    async fn list_categories(&self, page: Page) -> AppResult<Vec<Category>>;
    async fn update_category(&self, id: i32, changes: CategoryChanges) -> AppResult<Option<Category>>;
    async fn delete_category(&self, id: i32) -> AppResult<bool>;
    /// Active products per category, every category included.
    async fn category_product_counts(&self) -> AppResult<Vec<CategoryProductCount>>;

    async fn create_product(&self, new: NewProduct) -> AppResult<Product>;
    async fn get_product(&self, id: i32) -> AppResult<Option<Product>>;
    async fn get_product_by_slug(&self, slug: &str) -> AppResult<Option<Product>>;
    async fn get_products(&self, ids: &[i32]) -> AppResult<Vec<Product>>;
    async fn search_products(&self, filter: &ProductFilter, page: Page) -> AppResult<Vec<Product>>;
    /// Active products with `stock <= threshold`, lowest stock first.
    async fn low_stock_products(&self, threshold: i32, page: Page) -> AppResult<Vec<Product>>;
    async fn update_product(&self, id: i32, changes: ProductChanges) -> AppResult<Option<Product>>;
    async fn delete_product(&self, id: i32) -> AppResult<bool>;
    /// Add `change` (possibly negative) to the stock; the result must stay >= 0.
    async fn adjust_stock(&self, id: i32, change: i32) -> AppResult<Product>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, new: NewUser) -> AppResult<User>;
    async fn get_user(&self, id: i32) -> AppResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn list_users(&self, only_active: bool, page: Page) -> AppResult<Vec<User>>;
    async fn update_user(&self, id: i32, changes: UserChanges) -> AppResult<Option<User>>;
    async fn delete_user(&self, id: i32) -> AppResult<bool>;
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Fails with `DuplicateReview` when the user already reviewed the product.
    async fn create_review(&self, new: NewReview) -> AppResult<Review>;
    async fn get_review(&self, id: i32) -> AppResult<Option<Review>>;
    async fn list_product_reviews(&self, product_id: i32, page: Page) -> AppResult<Vec<Review>>;
    async fn list_user_reviews(&self, user_id: i32, page: Page) -> AppResult<Vec<Review>>;
    async fn update_review(&self, id: i32, changes: ReviewChanges) -> AppResult<Option<Review>>;
    async fn delete_review(&self, id: i32) -> AppResult<bool>;
    async fn rating_counts(&self, product_id: i32) -> AppResult<Vec<(i32, i64)>>;
    async fn count_user_reviews(&self, user_id: i32) -> AppResult<i64>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Validate every line against live stock, insert the order and its
    /// items and decrement stock, all or nothing.
    async fn checkout(&self, request: CheckoutRequest) -> AppResult<OrderWithItems>;
    /// Apply a status change decided by `shared::order::plan_transition`,
    /// restoring stock when a pending order is cancelled.
    async fn transition_order(
        &self,
        actor: &Principal,
        order_id: i32,
        to: OrderStatus,
    ) -> AppResult<Order>;
    /// Owner only, and only while the order is pending.
    async fn update_shipping_address(
        &self,
        actor: &Principal,
        order_id: i32,
        address: String,
    ) -> AppResult<Order>;
    async fn get_order(&self, id: i32) -> AppResult<Option<Order>>;
    async fn get_order_items(&self, order_id: i32) -> AppResult<Vec<OrderItem>>;
    async fn list_user_orders(
        &self,
        user_id: i32,
        status: Option<OrderStatus>,
        page: Page,
    ) -> AppResult<Vec<Order>>;
    async fn list_orders_by_status(&self, status: OrderStatus, page: Page) -> AppResult<Vec<Order>>;
    async fn delete_order(&self, id: i32) -> AppResult<bool>;
    async fn order_status_counts(&self, user_id: i32) -> AppResult<Vec<(OrderStatus, i64)>>;
    /// Sum of `total_price` over the user's orders in `paid`.
    async fn paid_total(&self, user_id: i32) -> AppResult<Option<BigDecimal>>;
}

/// Everything the HTTP layer needs from storage.
pub trait ShopStore: CatalogRepository + UserRepository + ReviewRepository + OrderRepository {}

impl<T> ShopStore for T where T: CatalogRepository + UserRepository + ReviewRepository + OrderRepository {}
