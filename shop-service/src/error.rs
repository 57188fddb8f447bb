use std::fmt::Display;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::Serialize;
use shared::ShopError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Errors crossing the HTTP boundary.
///
/// Business-rule failures pass through with their own message. Storage and
/// internal failures are logged here and answered with a generic body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Shop(#[from] ShopError),

    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(message: impl Display) -> Self {
        Self::Internal(message.to_string())
    }
}

impl From<bb8::RunError<diesel_async::pooled_connection::PoolError>> for AppError {
    fn from(e: bb8::RunError<diesel_async::pooled_connection::PoolError>) -> Self {
        Self::Pool(e.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::Internal(format!("token signing failed: {e}"))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub error: String,
}

fn shop_status(err: &ShopError) -> StatusCode {
    match err {
        ShopError::NotFound { .. } => StatusCode::NOT_FOUND,
        ShopError::Unavailable(_)
        | ShopError::InsufficientStock { .. }
        | ShopError::EmptyCart
        | ShopError::InvalidTransition { .. }
        | ShopError::DuplicateReview
        | ShopError::Validation(_) => StatusCode::BAD_REQUEST,
        ShopError::Forbidden(_) | ShopError::InactiveUser => StatusCode::FORBIDDEN,
        ShopError::InvalidToken(_)
        | ShopError::WrongTokenType { .. }
        | ShopError::TokenExpired
        | ShopError::InvalidCredentials
        | ShopError::Unauthenticated => StatusCode::UNAUTHORIZED,
        ShopError::Conflict(_) => StatusCode::CONFLICT,
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Shop(err) => (shop_status(err), err.code(), err.to_string()),
            AppError::Database(DieselError::DatabaseError(kind, info)) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::CheckViolation => {
                    tracing::warn!(kind = ?kind, detail = info.message(), "integrity violation");
                    (
                        StatusCode::CONFLICT,
                        "conflict",
                        "request conflicts with existing data".to_string(),
                    )
                }
                _ => {
                    tracing::error!(error = %self, "database failure");
                    internal()
                }
            },
            AppError::Database(DieselError::NotFound) => (
                StatusCode::NOT_FOUND,
                "not_found",
                "resource not found".to_string(),
            ),
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "request failed");
                internal()
            }
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal server error".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error) = self.parts();
        (status, Json(ErrorResponse { code, error })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use shared::OrderStatus;

    #[rstest]
    #[case(ShopError::not_found("order", 1), StatusCode::NOT_FOUND)]
    #[case(ShopError::EmptyCart, StatusCode::BAD_REQUEST)]
    #[case(ShopError::DuplicateReview, StatusCode::BAD_REQUEST)]
    #[case(
        ShopError::InvalidTransition { from: OrderStatus::Paid, to: OrderStatus::Cancelled },
        StatusCode::BAD_REQUEST
    )]
    #[case(ShopError::forbidden("no"), StatusCode::FORBIDDEN)]
    #[case(ShopError::TokenExpired, StatusCode::UNAUTHORIZED)]
    #[case(ShopError::conflict("taken"), StatusCode::CONFLICT)]
    fn shop_errors_map_to_rest_statuses(#[case] err: ShopError, #[case] status: StatusCode) {
        assert_eq!(AppError::from(err).into_response().status(), status);
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let (status, code, message) = AppError::internal("pool exploded at 10.0.0.1").parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "internal");
        assert!(!message.contains("10.0.0.1"));
    }
}
