use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::catalog::{resolve_slug, validate_name, ProductFilter};
use shared::ShopError;

use super::{double_option, AdminUser, AppState, PageQuery};
use crate::error::AppResult;
use crate::models::{Category, CategoryChanges, CategoryProductCount, NewCategory, Product};

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub slug: Option<String>,
    pub parent_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<i32>>,
}

#[derive(Debug, Serialize)]
pub struct CategoryWithProducts {
    #[serde(flatten)]
    pub category: Category,
    pub products: Vec<Product>,
}

async fn load_category(state: &AppState, id: i32) -> AppResult<Category> {
    Ok(state
        .store
        .get_category(id)
        .await?
        .ok_or_else(|| ShopError::not_found("category", id))?)
}

async fn ensure_slug_free(state: &AppState, slug: &str, except: Option<i32>) -> AppResult<()> {
    if let Some(existing) = state.store.get_category_by_slug(slug).await? {
        if Some(existing.id) != except {
            return Err(ShopError::conflict(format!("category slug '{slug}' already exists")).into());
        }
    }
    Ok(())
}

pub async fn list_categories(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Category>>> {
    Ok(Json(state.store.list_categories(query.page()?).await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(request): Json<CreateCategoryRequest>,
) -> AppResult<(StatusCode, Json<Category>)> {
    validate_name("name", &request.name)?;
    let slug = resolve_slug(request.slug.as_deref(), &request.name)?;
    if let Some(parent_id) = request.parent_id {
        load_category(&state, parent_id).await?;
    }
    ensure_slug_free(&state, &slug, None).await?;

    let category = state
        .store
        .create_category(NewCategory {
            name: request.name,
            slug,
            parent_id: request.parent_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Category>> {
    Ok(Json(load_category(&state, id).await?))
}

pub async fn get_category_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Category>> {
    let category = state
        .store
        .get_category_by_slug(&slug)
        .await?
        .ok_or_else(|| ShopError::not_found("category", &slug))?;
    Ok(Json(category))
}

pub async fn update_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateCategoryRequest>,
) -> AppResult<Json<Category>> {
    load_category(&state, id).await?;
    if let Some(name) = &request.name {
        validate_name("name", name)?;
    }

    // A rename without an explicit slug regenerates it.
    let slug = match (&request.slug, &request.name) {
        (Some(slug), _) => Some(resolve_slug(Some(slug.as_str()), "")?),
        (None, Some(name)) => Some(resolve_slug(None, name)?),
        (None, None) => None,
    };
    if let Some(slug) = &slug {
        ensure_slug_free(&state, slug, Some(id)).await?;
    }
    if let Some(Some(parent_id)) = request.parent_id {
        if parent_id == id {
            return Err(ShopError::validation("a category cannot be its own parent").into());
        }
        load_category(&state, parent_id).await?;
    }

    let changes = CategoryChanges {
        name: request.name,
        slug,
        parent_id: request.parent_id,
        updated_at: Some(Utc::now()),
    };
    let category = state
        .store
        .update_category(id, changes)
        .await?
        .ok_or_else(|| ShopError::not_found("category", id))?;
    Ok(Json(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    if !state.store.delete_category(id).await? {
        return Err(ShopError::not_found("category", id).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn category_with_products(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<CategoryWithProducts>> {
    let category = load_category(&state, id).await?;
    let filter = ProductFilter {
        category_id: Some(id),
        ..ProductFilter::default()
    };
    let products = state.store.search_products(&filter, query.page()?).await?;
    Ok(Json(CategoryWithProducts { category, products }))
}

pub async fn product_counts(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<CategoryProductCount>>> {
    Ok(Json(state.store.category_product_counts().await?))
}
