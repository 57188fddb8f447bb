//! Request extractors for the authenticated user and the cart session.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use shared::auth::TokenService;
use shared::{ShopError, TokenKind};
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::models::User;

pub const CART_SESSION_HEADER: &str = "x-cart-session";

/// The active user behind a valid access token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// A [`CurrentUser`] with the superuser flag.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[derive(Debug, Clone, Copy)]
pub struct CartSession(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(ShopError::Unauthenticated)?;
        let token = TokenService::extract_from_header(header)
            .ok_or_else(|| ShopError::InvalidToken("expected a bearer token".to_string()))?;

        let claims = state.tokens.decode(token, TokenKind::Access).map_err(|e| {
            tracing::warn!(error = %e, uri = %parts.uri, "access token rejected");
            e
        })?;
        let user = state
            .store
            .get_user(claims.user_id()?)
            .await?
            .ok_or_else(|| ShopError::InvalidToken("user no longer exists".to_string()))?;
        if !user.is_active {
            return Err(ShopError::InactiveUser.into());
        }

        let current = CurrentUser(user);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_superuser {
            return Err(ShopError::forbidden("administrator privileges required").into());
        }
        Ok(AdminUser(user))
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CartSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CART_SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ShopError::validation("missing X-Cart-Session header"))?;
        let session = Uuid::parse_str(value.trim())
            .map_err(|_| ShopError::validation("X-Cart-Session must be a UUID"))?;
        Ok(CartSession(session))
    }
}
