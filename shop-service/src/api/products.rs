use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use shared::catalog::{
    resolve_slug, validate_name, validate_price, validate_stock, ProductFilter, ProductSort,
    DEFAULT_LOW_STOCK_THRESHOLD,
};
use shared::{Page, ShopError};
use tracing::info;

use super::{decimal, double_option, optional_decimal, AdminUser, AppState};
use crate::error::AppResult;
use crate::models::{NewProduct, Product, ProductChanges};

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub search: Option<String>,
    pub category_id: Option<i32>,
    pub min_price: Option<BigDecimal>,
    pub max_price: Option<BigDecimal>,
    pub only_active: Option<bool>,
    pub sort: Option<ProductSort>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryProductsQuery {
    pub only_active: Option<bool>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<i32>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StockQuery {
    pub quantity_change: i32,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    #[serde(deserialize_with = "decimal")]
    pub price: BigDecimal,
    pub category_id: i32,
    pub image: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub stock: i32,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "optional_decimal")]
    pub price: Option<BigDecimal>,
    pub category_id: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub image: Option<Option<String>>,
    pub is_active: Option<bool>,
    pub stock: Option<i32>,
}

async fn load_product(state: &AppState, id: i32) -> AppResult<Product> {
    Ok(state
        .store
        .get_product(id)
        .await?
        .ok_or_else(|| ShopError::not_found("product", id))?)
}

async fn ensure_category(state: &AppState, id: i32) -> AppResult<()> {
    state
        .store
        .get_category(id)
        .await?
        .ok_or_else(|| ShopError::not_found("category", id))?;
    Ok(())
}

async fn ensure_slug_free(state: &AppState, slug: &str, except: Option<i32>) -> AppResult<()> {
    if let Some(existing) = state.store.get_product_by_slug(slug).await? {
        if Some(existing.id) != except {
            return Err(ShopError::conflict(format!("product slug '{slug}' already exists")).into());
        }
    }
    Ok(())
}

pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let page = Page::new(query.offset, query.limit)?;
    let filter = ProductFilter {
        search: query.search,
        category_id: query.category_id,
        min_price: query.min_price,
        max_price: query.max_price,
        only_active: query.only_active.unwrap_or(true),
        sort: query.sort.unwrap_or_default(),
    };
    filter.validate()?;
    Ok(Json(state.store.search_products(&filter, page).await?))
}

pub async fn create_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(request): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<Product>)> {
    validate_name("name", &request.name)?;
    validate_price(&request.price)?;
    validate_stock(request.stock)?;
    let slug = resolve_slug(request.slug.as_deref(), &request.name)?;
    ensure_category(&state, request.category_id).await?;
    ensure_slug_free(&state, &slug, None).await?;

    let product = state
        .store
        .create_product(NewProduct {
            name: request.name,
            slug,
            description: request.description,
            price: request.price,
            stock: request.stock,
            is_active: request.is_active,
            image: request.image,
            category_id: request.category_id,
        })
        .await?;
    info!(product_id = product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Product>> {
    Ok(Json(load_product(&state, id).await?))
}

pub async fn get_product_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Product>> {
    let product = state
        .store
        .get_product_by_slug(&slug)
        .await?
        .ok_or_else(|| ShopError::not_found("product", &slug))?;
    Ok(Json(product))
}

pub async fn products_by_category(
    State(state): State<AppState>,
    Path(category_id): Path<i32>,
    Query(query): Query<CategoryProductsQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let page = Page::new(query.offset, query.limit)?;
    ensure_category(&state, category_id).await?;
    let filter = ProductFilter {
        category_id: Some(category_id),
        only_active: query.only_active.unwrap_or(true),
        ..ProductFilter::default()
    };
    Ok(Json(state.store.search_products(&filter, page).await?))
}

pub async fn low_stock(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<LowStockQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let page = Page::new(query.offset, query.limit)?;
    let threshold = query.threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
    validate_stock(threshold)?;
    Ok(Json(state.store.low_stock_products(threshold, page).await?))
}

pub async fn update_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateProductRequest>,
) -> AppResult<Json<Product>> {
    load_product(&state, id).await?;
    if let Some(name) = &request.name {
        validate_name("name", name)?;
    }
    if let Some(price) = &request.price {
        validate_price(price)?;
    }
    if let Some(stock) = request.stock {
        validate_stock(stock)?;
    }
    if let Some(category_id) = request.category_id {
        ensure_category(&state, category_id).await?;
    }

    let slug = match (&request.slug, &request.name) {
        (Some(slug), _) => Some(resolve_slug(Some(slug.as_str()), "")?),
        (None, Some(name)) => Some(resolve_slug(None, name)?),
        (None, None) => None,
    };
    if let Some(slug) = &slug {
        ensure_slug_free(&state, slug, Some(id)).await?;
    }

    let changes = ProductChanges {
        name: request.name,
        slug,
        description: request.description,
        price: request.price,
        stock: request.stock,
        is_active: request.is_active,
        image: request.image,
        category_id: request.category_id,
        updated_at: Some(Utc::now()),
    };
    let product = state
        .store
        .update_product(id, changes)
        .await?
        .ok_or_else(|| ShopError::not_found("product", id))?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    if !state.store.delete_product(id).await? {
        return Err(ShopError::not_found("product", id).into());
    }
    info!(product_id = id, "product deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
    Query(query): Query<StockQuery>,
) -> AppResult<Json<Product>> {
    Ok(Json(state.store.adjust_stock(id, query.quantity_change).await?))
}
