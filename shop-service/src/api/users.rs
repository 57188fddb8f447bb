use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use shared::auth::{ensure_owner_or_admin, validate_email, validate_password, validate_username};
use shared::order::UserStatistics;
use shared::ShopError;
use tracing::info;

use super::auth::ensure_unique_identity;
use super::{AdminUser, AppState, CurrentUser, PageQuery};
use crate::accounts::{hash_password, verify_password};
use crate::error::AppResult;
use crate::models::{NewUser, User, UserChanges};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

async fn load_user(state: &AppState, id: i32) -> AppResult<User> {
    Ok(state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| ShopError::not_found("user", id))?)
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.store.list_users(false, query.page()?).await?))
}

pub async fn list_active_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.store.list_users(true, query.page()?).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Json(request): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    validate_username(&request.username)?;
    validate_email(&request.email)?;
    validate_password(&request.password)?;
    ensure_unique_identity(&state, Some(&request.username), Some(&request.email), None).await?;

    let hashed_password = hash_password(request.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            username: request.username,
            email: request.email,
            hashed_password,
            is_active: request.is_active,
            is_superuser: request.is_superuser,
        })
        .await?;
    info!(user_id = user.id, created_by = admin.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<i32>,
) -> AppResult<Json<User>> {
    ensure_owner_or_admin(&current.principal(), id, "user")?;
    Ok(Json(load_user(&state, id).await?))
}

pub async fn get_user_by_username(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(username): Path<String>,
) -> AppResult<Json<User>> {
    let user = state
        .store
        .get_user_by_username(&username)
        .await?
        .ok_or_else(|| ShopError::not_found("user", &username))?;
    ensure_owner_or_admin(&current.principal(), user.id, "user")?;
    Ok(Json(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<i32>,
    Json(request): Json<UpdateUserRequest>,
) -> AppResult<Json<User>> {
    ensure_owner_or_admin(&current.principal(), id, "user")?;
    if !current.is_superuser && (request.is_active.is_some() || request.is_superuser.is_some()) {
        return Err(ShopError::forbidden("only administrators can change account flags").into());
    }
    if let Some(username) = &request.username {
        validate_username(username)?;
    }
    if let Some(email) = &request.email {
        validate_email(email)?;
    }
    if let Some(password) = &request.password {
        validate_password(password)?;
    }
    load_user(&state, id).await?;
    ensure_unique_identity(
        &state,
        request.username.as_deref(),
        request.email.as_deref(),
        Some(id),
    )
    .await?;

    let hashed_password = match request.password {
        Some(password) => Some(hash_password(password).await?),
        None => None,
    };
    let changes = UserChanges {
        username: request.username,
        email: request.email,
        hashed_password,
        is_active: request.is_active,
        is_superuser: request.is_superuser,
        updated_at: Some(Utc::now()),
    };
    let user = state
        .store
        .update_user(id, changes)
        .await?
        .ok_or_else(|| ShopError::not_found("user", id))?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    if admin.id == id {
        return Err(ShopError::validation("administrators cannot delete themselves").into());
    }
    if !state.store.delete_user(id).await? {
        return Err(ShopError::not_found("user", id).into());
    }
    info!(user_id = id, deleted_by = admin.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_active(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i32>,
) -> AppResult<Json<User>> {
    if admin.id == id {
        return Err(ShopError::validation("administrators cannot deactivate themselves").into());
    }
    let user = load_user(&state, id).await?;
    let changes = UserChanges {
        is_active: Some(!user.is_active),
        updated_at: Some(Utc::now()),
        ..UserChanges::default()
    };
    let user = state
        .store
        .update_user(id, changes)
        .await?
        .ok_or_else(|| ShopError::not_found("user", id))?;
    info!(user_id = id, is_active = user.is_active, "user activity toggled");
    Ok(Json(user))
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Json(request): Json<ChangePasswordRequest>,
) -> AppResult<StatusCode> {
    if !verify_password(request.current_password, current.hashed_password.clone()).await? {
        return Err(ShopError::validation("current password is incorrect").into());
    }
    validate_password(&request.new_password)?;

    let changes = UserChanges {
        hashed_password: Some(hash_password(request.new_password).await?),
        updated_at: Some(Utc::now()),
        ..UserChanges::default()
    };
    state.store.update_user(current.id, changes).await?;
    info!(user_id = current.id, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

async fn statistics(state: &AppState, user_id: i32) -> AppResult<UserStatistics> {
    let counts = state.store.order_status_counts(user_id).await?;
    let paid_total = state.store.paid_total(user_id).await?;
    let reviews = state.store.count_user_reviews(user_id).await?;
    Ok(UserStatistics::from_counts(user_id, &counts, paid_total, reviews))
}

pub async fn my_statistics(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
) -> AppResult<Json<UserStatistics>> {
    Ok(Json(statistics(&state, current.id).await?))
}

pub async fn user_statistics(
    State(state): State<AppState>,
    CurrentUser(current): CurrentUser,
    Path(id): Path<i32>,
) -> AppResult<Json<UserStatistics>> {
    ensure_owner_or_admin(&current.principal(), id, "user")?;
    load_user(&state, id).await?;
    Ok(Json(statistics(&state, id).await?))
}
