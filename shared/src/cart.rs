//! Session cart rules.
//!
//! A [`Cart`] maps product ids to a quantity and the unit price seen when the
//! line was last touched, in the order the lines were first added. The functions here never load anything: callers
//! pass the current [`ProductSnapshot`] (or `None` when the product is gone)
//! and persist the cart afterwards.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::inventory::{ensure_available, ensure_orderable, ProductSnapshot};
use crate::order::{line_total, CheckoutLine};
use crate::{ShopError, ShopResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartEntry {
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    entries: Vec<(i32, CartEntry)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLineDetails {
    pub product_id: i32,
    pub quantity: i32,
    pub name: String,
    pub price: BigDecimal,
    pub total: BigDecimal,
    pub image: Option<String>,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartDetails {
    pub items: Vec<CartLineDetails>,
    pub total_price: BigDecimal,
    pub total_items: i64,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, product_id: i32) -> Option<usize> {
        self.entries.iter().position(|(id, _)| *id == product_id)
    }

    pub fn get(&self, product_id: i32) -> Option<&CartEntry> {
        self.position(product_id).map(|index| &self.entries[index].1)
    }

    pub fn product_ids(&self) -> Vec<i32> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    /// Add `quantity` units on top of what is already in the cart.
    pub fn add(
        &mut self,
        product_id: i32,
        product: Option<&ProductSnapshot>,
        quantity: i32,
    ) -> ShopResult<&CartEntry> {
        if quantity < 1 {
            return Err(ShopError::validation("quantity must be >= 1"));
        }
        let current = self.get(product_id).map_or(0, |e| e.quantity);
        let wanted = current
            .checked_add(quantity)
            .ok_or_else(|| ShopError::validation("quantity is out of range"))?;
        let product = ensure_orderable(product_id, product, wanted)?;

        let index = match self.position(product_id) {
            Some(index) => index,
            None => {
                self.entries.push((
                    product_id,
                    CartEntry {
                        quantity: 0,
                        unit_price: product.price.clone(),
                    },
                ));
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[index].1;
        entry.quantity = wanted;
        entry.unit_price = product.price.clone();
        Ok(&*entry)
    }

    /// Set the quantity of a line already in the cart. Zero removes it.
    /// Returns the updated entry, or `None` when the line was removed.
    pub fn update(
        &mut self,
        product_id: i32,
        product: Option<&ProductSnapshot>,
        quantity: i32,
    ) -> ShopResult<Option<&CartEntry>> {
        if quantity < 0 {
            return Err(ShopError::validation("quantity must be >= 0"));
        }
        let index = self
            .position(product_id)
            .ok_or_else(|| ShopError::not_found("cart item", product_id))?;
        if quantity == 0 {
            self.entries.remove(index);
            return Ok(None);
        }

        let product = product.ok_or_else(|| ShopError::not_found("product", product_id))?;
        ensure_available(product, product.stock, quantity)?;

        let entry = &mut self.entries[index].1;
        entry.quantity = quantity;
        entry.unit_price = product.price.clone();
        Ok(Some(&*entry))
    }

    pub fn remove(&mut self, product_id: i32) -> ShopResult<CartEntry> {
        let index = self
            .position(product_id)
            .ok_or_else(|| ShopError::not_found("cart item", product_id))?;
        Ok(self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Join entries with the current catalog. Lines whose product has been
    /// deleted since it was added are dropped from the view.
    pub fn details(&self, catalog: &HashMap<i32, ProductSnapshot>) -> CartDetails {
        let mut items = Vec::with_capacity(self.entries.len());
        let mut total_price = BigDecimal::zero();
        let mut total_items: i64 = 0;

        for (product_id, entry) in &self.entries {
            let Some(product) = catalog.get(product_id) else {
                continue;
            };
            let total = line_total(&entry.unit_price, entry.quantity);
            total_price += &total;
            total_items += i64::from(entry.quantity);
            items.push(CartLineDetails {
                product_id: *product_id,
                quantity: entry.quantity,
                name: product.name.clone(),
                price: entry.unit_price.clone(),
                total,
                image: product.image.clone(),
                stock: product.stock,
            });
        }

        CartDetails {
            items,
            total_price,
            total_items,
        }
    }

    /// Lines for the checkout workflow, carrying the snapshotted prices.
    pub fn checkout_lines(&self) -> Vec<CheckoutLine> {
        self.entries
            .iter()
            .map(|(product_id, entry)| CheckoutLine {
                product_id: *product_id,
                quantity: entry.quantity,
                unit_price: Some(entry.unit_price.clone()),
            })
            .collect()
    }
}
