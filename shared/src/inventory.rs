//! Stock invariants: a product's stock never drops below zero.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::{ShopError, ShopResult};

/// The live product facts that cart and checkout rules look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: i32,
    pub name: String,
    pub price: BigDecimal,
    pub stock: i32,
    pub is_active: bool,
    pub image: Option<String>,
}

/// Check one requested line against a product lookup, in the order
/// existence, active flag, stock.
pub fn ensure_orderable(
    product_id: i32,
    product: Option<&ProductSnapshot>,
    requested: i32,
) -> ShopResult<&ProductSnapshot> {
    let product = product.ok_or_else(|| ShopError::not_found("product", product_id))?;
    if !product.is_active {
        return Err(ShopError::Unavailable(product.name.clone()));
    }
    ensure_available(product, product.stock, requested)?;
    Ok(product)
}

pub fn ensure_available(product: &ProductSnapshot, available: i32, requested: i32) -> ShopResult<()> {
    if available < requested {
        return Err(ShopError::InsufficientStock {
            product: product.name.clone(),
            available,
            requested,
        });
    }
    Ok(())
}

/// Apply an administrative stock change (positive adds, negative removes).
pub fn adjust_stock(current: i32, change: i32) -> ShopResult<i32> {
    let next = current
        .checked_add(change)
        .ok_or_else(|| ShopError::validation("stock change is out of range"))?;
    if next < 0 {
        return Err(ShopError::validation(format!(
            "cannot reduce stock below 0. Current: {}, change: {}",
            current, change
        )));
    }
    Ok(next)
}

/// Put cancelled units back.
pub fn restore_stock(current: i32, quantity: i32) -> ShopResult<i32> {
    current
        .checked_add(quantity)
        .ok_or_else(|| ShopError::validation("restored stock is out of range"))
}

/// Running tally of units claimed during one checkout, so that two lines for
/// the same product are checked against what the first one left behind.
#[derive(Debug, Default)]
pub struct StockLedger {
    claimed: HashMap<i32, i32>,
}

impl StockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&mut self, product: &ProductSnapshot, quantity: i32) -> ShopResult<()> {
        let already = self.claimed.get(&product.id).copied().unwrap_or(0);
        ensure_available(product, product.stock - already, quantity)?;
        self.claimed.insert(product.id, already + quantity);
        Ok(())
    }

    /// Product id and the total units claimed for it.
    pub fn claims(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.claimed.iter().map(|(id, qty)| (*id, *qty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(stock: i32, is_active: bool) -> ProductSnapshot {
        ProductSnapshot {
            id: 1,
            name: "Teapot".to_string(),
            price: "12.50".parse().unwrap(),
            stock,
            is_active,
            image: None,
        }
    }

    #[test]
    fn missing_product_is_not_found() {
        assert_eq!(
            ensure_orderable(42, None, 1).unwrap_err(),
            ShopError::not_found("product", 42)
        );
    }

    #[test]
    fn inactive_product_is_unavailable_even_with_stock() {
        let p = product(10, false);
        assert_eq!(
            ensure_orderable(1, Some(&p), 1).unwrap_err(),
            ShopError::Unavailable("Teapot".to_string())
        );
    }

    #[test]
    fn requested_above_stock_is_rejected() {
        let p = product(3, true);
        assert_eq!(
            ensure_orderable(1, Some(&p), 4).unwrap_err(),
            ShopError::InsufficientStock {
                product: "Teapot".to_string(),
                available: 3,
                requested: 4
            }
        );
        assert!(ensure_orderable(1, Some(&p), 3).is_ok());
    }

    #[test]
    fn adjustment_never_goes_negative() {
        assert_eq!(adjust_stock(5, -5).unwrap(), 0);
        assert_eq!(adjust_stock(5, 7).unwrap(), 12);
        assert!(matches!(adjust_stock(5, -6), Err(ShopError::Validation(_))));
        assert!(adjust_stock(i32::MAX, 1).is_err());
    }

    #[test]
    fn ledger_accumulates_claims_on_same_product() {
        let p = product(5, true);
        let mut ledger = StockLedger::new();
        ledger.claim(&p, 3).unwrap();
        let err = ledger.claim(&p, 3).unwrap_err();
        assert_eq!(
            err,
            ShopError::InsufficientStock {
                product: "Teapot".to_string(),
                available: 2,
                requested: 3
            }
        );
        ledger.claim(&p, 2).unwrap();
        assert_eq!(ledger.claims().collect::<Vec<_>>(), vec![(1, 5)]);
    }
}
