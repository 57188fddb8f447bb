use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use shared::auth::ensure_owner_or_admin;
use shared::catalog::{validate_rating, RatingSummary};
use shared::ShopError;
use tracing::info;

use super::{double_option, AppState, CurrentUser, PageQuery};
use crate::error::AppResult;
use crate::models::{NewReview, Review, ReviewChanges};

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateReviewRequest {
    pub rating: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub comment: Option<Option<String>>,
}

async fn ensure_product(state: &AppState, id: i32) -> AppResult<()> {
    state
        .store
        .get_product(id)
        .await?
        .ok_or_else(|| ShopError::not_found("product", id))?;
    Ok(())
}

async fn load_review(state: &AppState, id: i32) -> AppResult<Review> {
    Ok(state
        .store
        .get_review(id)
        .await?
        .ok_or_else(|| ShopError::not_found("review", id))?)
}

pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Review>>> {
    let page = query.page()?;
    ensure_product(&state, product_id).await?;
    Ok(Json(state.store.list_product_reviews(product_id, page).await?))
}

pub async fn create_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<i32>,
    Json(request): Json<CreateReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    validate_rating(request.rating)?;
    ensure_product(&state, product_id).await?;

    let review = state
        .store
        .create_review(NewReview {
            product_id,
            user_id: user.id,
            rating: request.rating,
            comment: request.comment,
        })
        .await?;
    info!(review_id = review.id, product_id, user_id = user.id, "review created");
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn product_rating(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> AppResult<Json<RatingSummary>> {
    ensure_product(&state, product_id).await?;
    let counts = state.store.rating_counts(product_id).await?;
    Ok(Json(RatingSummary::from_counts(product_id, &counts)))
}

pub async fn my_reviews(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Review>>> {
    Ok(Json(state.store.list_user_reviews(user.id, query.page()?).await?))
}

pub async fn user_reviews(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<Review>>> {
    let page = query.page()?;
    state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| ShopError::not_found("user", user_id))?;
    Ok(Json(state.store.list_user_reviews(user_id, page).await?))
}

pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Review>> {
    Ok(Json(load_review(&state, id).await?))
}

pub async fn update_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateReviewRequest>,
) -> AppResult<Json<Review>> {
    let review = load_review(&state, id).await?;
    ensure_owner_or_admin(&user.principal(), review.user_id, "review")?;
    if let Some(rating) = request.rating {
        validate_rating(rating)?;
    }

    let changes = ReviewChanges {
        rating: request.rating,
        comment: request.comment,
        updated_at: Some(Utc::now()),
    };
    let review = state
        .store
        .update_review(id, changes)
        .await?
        .ok_or_else(|| ShopError::not_found("review", id))?;
    Ok(Json(review))
}

pub async fn delete_review(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let review = load_review(&state, id).await?;
    ensure_owner_or_admin(&user.principal(), review.user_id, "review")?;
    if !state.store.delete_review(id).await? {
        return Err(ShopError::not_found("review", id).into());
    }
    info!(review_id = id, deleted_by = user.id, "review deleted");
    Ok(StatusCode::NO_CONTENT)
}
