use std::fmt::Display;

use thiserror::Error;

use crate::auth::TokenKind;
use crate::order::OrderStatus;

/// Every business-rule failure the storefront can report.
///
/// Workflows return these instead of panicking or logging; the HTTP layer
/// maps each variant to a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShopError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("product '{0}' is unavailable")]
    Unavailable(String),

    #[error("insufficient stock for '{product}': available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i32,
        requested: i32,
    },

    #[error("cart is empty")]
    EmptyCart,

    #[error("cannot change order status from '{from}' to '{to}'")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("{0}")]
    Forbidden(String),

    #[error("you have already reviewed this product")]
    DuplicateReview,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid token type: expected '{expected}', got '{found}'")]
    WrongTokenType {
        expected: TokenKind,
        found: TokenKind,
    },

    #[error("token expired")]
    TokenExpired,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("user is not active")]
    InactiveUser,

    #[error("authentication required")]
    Unauthenticated,
}

impl ShopError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Stable machine-readable code for API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::EmptyCart => "empty_cart",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Forbidden(_) => "forbidden",
            Self::DuplicateReview => "duplicate_review",
            Self::InvalidToken(_) => "invalid_token",
            Self::WrongTokenType { .. } => "wrong_token_type",
            Self::TokenExpired => "token_expired",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InactiveUser => "inactive_user",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}
