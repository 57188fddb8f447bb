use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use shared::auth::{validate_email, validate_password, validate_username};
use shared::{ShopError, TokenKind};
use tracing::info;

use super::{AppState, CurrentUser};
use crate::accounts::{hash_password, verify_password};
use crate::error::AppResult;
use crate::models::{NewUser, User};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
}

/// Reject a username or email that another account already uses.
pub(super) async fn ensure_unique_identity(
    state: &AppState,
    username: Option<&str>,
    email: Option<&str>,
    except: Option<i32>,
) -> AppResult<()> {
    if let Some(username) = username {
        if let Some(existing) = state.store.get_user_by_username(username).await? {
            if Some(existing.id) != except {
                return Err(ShopError::conflict("username already registered").into());
            }
        }
    }
    if let Some(email) = email {
        if let Some(existing) = state.store.get_user_by_email(email).await? {
            if Some(existing.id) != except {
                return Err(ShopError::conflict("email already registered").into());
            }
        }
    }
    Ok(())
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
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
            is_active: true,
            is_superuser: false,
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let user = state
        .store
        .get_user_by_username(&request.username)
        .await?
        .ok_or(ShopError::InvalidCredentials)?;
    if !verify_password(request.password, user.hashed_password.clone()).await? {
        return Err(ShopError::InvalidCredentials.into());
    }
    if !user.is_active {
        return Err(ShopError::InactiveUser.into());
    }

    let pair = state.tokens.issue_pair(user.id, &user.username)?;
    info!(user_id = user.id, "user logged in");
    Ok(Json(TokenResponse {
        access_token: pair.access_token,
        refresh_token: Some(pair.refresh_token),
        token_type: pair.token_type,
        expires_in: state.tokens.access_ttl_seconds(),
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let claims = state.tokens.decode(&request.refresh_token, TokenKind::Refresh)?;
    let user = state
        .store
        .get_user(claims.user_id()?)
        .await?
        .ok_or_else(|| ShopError::InvalidToken("user no longer exists".to_string()))?;
    if !user.is_active {
        return Err(ShopError::InactiveUser.into());
    }

    Ok(Json(TokenResponse {
        access_token: state.tokens.issue_access(user.id, &user.username)?,
        refresh_token: None,
        token_type: "bearer".to_string(),
        expires_in: state.tokens.access_ttl_seconds(),
    }))
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}
