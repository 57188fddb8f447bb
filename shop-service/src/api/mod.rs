mod auth;
mod cart;
mod categories;
mod extract;
mod orders;
mod products;
mod reviews;
mod users;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, patch, post};
use axum::Router;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer};
use shared::auth::TokenService;
use shared::{Page, ShopResult};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cart_store::CartStore;
use crate::repository::ShopStore;

pub use extract::{AdminUser, CartSession, CurrentUser};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ShopStore>,
    pub carts: Arc<dyn CartStore>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(store: Arc<dyn ShopStore>, carts: Arc<dyn CartStore>, tokens: TokenService) -> Self {
        Self {
            store,
            carts,
            tokens: Arc::new(tokens),
        }
    }
}

/// `offset`/`limit` query parameters shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> ShopResult<Page> {
        Page::new(self.offset, self.limit)
    }
}

/// Distinguishes an absent JSON field (`None`) from an explicit `null`
/// (`Some(None)`) in partial updates.
pub(crate) fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DecimalRepr {
    Text(String),
    Number(f64),
}

impl DecimalRepr {
    fn parse<E: serde::de::Error>(self) -> Result<BigDecimal, E> {
        // f64 Display is the shortest round-trip form, so 19.99 stays 19.99.
        let text = match self {
            DecimalRepr::Text(text) => text,
            DecimalRepr::Number(number) => number.to_string(),
        };
        text.trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid decimal '{text}'")))
    }
}

/// Money accepted either as a JSON string or a JSON number.
pub(crate) fn decimal<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    DecimalRepr::deserialize(deserializer)?.parse()
}

pub(crate) fn optional_decimal<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<DecimalRepr>::deserialize(deserializer)?
        .map(DecimalRepr::parse)
        .transpose()
}

pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/active", get(users::list_active_users))
        .route("/users/me/statistics", get(users::my_statistics))
        .route("/users/me/change-password", post(users::change_password))
        .route("/users/username/:username", get(users::get_user_by_username))
        .route(
            "/users/:id",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/:id/toggle-active", patch(users::toggle_active))
        .route("/users/:id/statistics", get(users::user_statistics))
        .route(
            "/categories",
            get(categories::list_categories).post(categories::create_category),
        )
        .route(
            "/categories/stats/product-counts",
            get(categories::product_counts),
        )
        .route("/categories/slug/:slug", get(categories::get_category_by_slug))
        .route(
            "/categories/:id",
            get(categories::get_category)
                .patch(categories::update_category)
                .delete(categories::delete_category),
        )
        .route(
            "/categories/:id/with-products",
            get(categories::category_with_products),
        )
        .route(
            "/products",
            get(products::search_products).post(products::create_product),
        )
        .route("/products/low-stock", get(products::low_stock))
        .route("/products/slug/:slug", get(products::get_product_by_slug))
        .route("/products/category/:id", get(products::products_by_category))
        .route(
            "/products/:id",
            get(products::get_product)
                .patch(products::update_product)
                .delete(products::delete_product),
        )
        .route("/products/:id/stock", patch(products::adjust_stock))
        .route(
            "/products/:id/reviews",
            get(reviews::list_product_reviews).post(reviews::create_review),
        )
        .route("/products/:id/rating", get(reviews::product_rating))
        .route("/reviews/my", get(reviews::my_reviews))
        .route("/reviews/user/:id", get(reviews::user_reviews))
        .route(
            "/reviews/:id",
            get(reviews::get_review)
                .patch(reviews::update_review)
                .delete(reviews::delete_review),
        )
        .route("/orders", get(orders::my_orders).post(orders::create_order))
        .route("/orders/user/:id", get(orders::user_orders))
        .route("/orders/status/:status", get(orders::orders_by_status))
        .route(
            "/orders/:id",
            get(orders::get_order).delete(orders::delete_order),
        )
        .route("/orders/:id/items", get(orders::order_items))
        .route("/orders/:id/total", get(orders::order_total))
        .route("/orders/:id/status", patch(orders::change_status))
        .route(
            "/orders/:id/shipping-address",
            patch(orders::update_shipping_address),
        )
        .route("/cart/session", post(cart::new_session))
        .route(
            "/cart",
            get(cart::view_cart)
                .post(cart::add_item)
                .patch(cart::update_item)
                .delete(cart::clear_cart),
        )
        .route("/cart/checkout", post(cart::checkout))
        .route("/cart/:product_id", axum::routing::delete(cart::remove_item));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}
