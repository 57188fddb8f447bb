//! Storefront domain rules shared by the service crates.
//!
//! Everything in here is pure: no database, no HTTP. Repositories feed
//! plain values in and persist whatever these functions decide.

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod inventory;
pub mod order;

use serde::{Deserialize, Serialize};

pub use auth::{is_owner_or_admin, Principal, TokenKind};
pub use cart::Cart;
pub use error::ShopError;
pub use inventory::ProductSnapshot;
pub use order::OrderStatus;

pub type ShopResult<T> = Result<T, ShopError>;

/// Offset/limit window used by every list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Page {
    pub const DEFAULT_LIMIT: i64 = 25;
    pub const MAX_LIMIT: i64 = 100;

    pub fn new(offset: Option<i64>, limit: Option<i64>) -> ShopResult<Self> {
        let offset = offset.unwrap_or(0);
        let limit = limit.unwrap_or(Self::DEFAULT_LIMIT);

        if offset < 0 {
            return Err(ShopError::validation("offset must be >= 0"));
        }
        if !(1..=Self::MAX_LIMIT).contains(&limit) {
            return Err(ShopError::validation(format!(
                "limit must be between 1 and {}",
                Self::MAX_LIMIT
            )));
        }

        Ok(Self { offset, limit })
    }

    /// Slice an already ordered collection, for stores that filter in memory.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset as usize)
            .take(self.limit as usize)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_bounds() {
        assert_eq!(Page::new(None, None).unwrap(), Page::default());
        assert!(Page::new(Some(-1), None).is_err());
        assert!(Page::new(None, Some(0)).is_err());
        assert!(Page::new(None, Some(101)).is_err());
        assert_eq!(Page::new(Some(5), Some(100)).unwrap().limit, 100);
    }

    #[test]
    fn page_apply_skips_and_takes() {
        let page = Page::new(Some(1), Some(2)).unwrap();
        assert_eq!(page.apply(vec![1, 2, 3, 4]), vec![2, 3]);
    }
}
