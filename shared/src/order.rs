use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::auth::Principal;
use crate::{ShopError, ShopResult};

pub const MIN_SHIPPING_ADDRESS_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                let available: Vec<&str> = OrderStatus::ALL.iter().map(|s| s.as_str()).collect();
                ShopError::validation(format!(
                    "invalid status '{}'. Available: {}",
                    s,
                    available.join(", ")
                ))
            })
    }
}

/// Outcome of an allowed status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Only pending -> cancelled puts the reserved units back on the shelf.
    pub restores_stock: bool,
}

/// Decide whether `actor` may move an order owned by `owner_id` from `from`
/// to `to`.
///
/// Customers may only cancel their own pending orders. Administrators may
/// set any status, but nobody can leave a terminal state: reopening a
/// cancelled order would restore its stock a second time.
pub fn plan_transition(
    actor: &Principal,
    owner_id: i32,
    from: OrderStatus,
    to: OrderStatus,
) -> ShopResult<TransitionPlan> {
    if !actor.is_superuser {
        if actor.id != owner_id {
            return Err(ShopError::forbidden("no access to this order"));
        }
        if to != OrderStatus::Cancelled {
            return Err(ShopError::forbidden("only administrators can change order status"));
        }
        if from != OrderStatus::Pending {
            return Err(ShopError::InvalidTransition { from, to });
        }
    } else if from.is_terminal() {
        return Err(ShopError::InvalidTransition { from, to });
    }

    Ok(TransitionPlan {
        from,
        to,
        restores_stock: from == OrderStatus::Pending && to == OrderStatus::Cancelled,
    })
}

/// A requested order line. `unit_price` is the cart snapshot when the line
/// comes from a cart; `None` means "capture the live price".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub user_id: i32,
    pub shipping_address: String,
    pub lines: Vec<CheckoutLine>,
}

impl CheckoutRequest {
    /// Shape checks that need no product data. An empty cart is reported
    /// before anything else.
    pub fn validate(&self) -> ShopResult<()> {
        if self.lines.is_empty() {
            return Err(ShopError::EmptyCart);
        }
        validate_shipping_address(&self.shipping_address)?;
        for line in &self.lines {
            if line.quantity <= 0 {
                return Err(ShopError::validation(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if let Some(price) = &line.unit_price {
                if price < &BigDecimal::zero() {
                    return Err(ShopError::validation(format!(
                        "price for product {} must not be negative",
                        line.product_id
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn validate_shipping_address(address: &str) -> ShopResult<()> {
    if address.trim().chars().count() < MIN_SHIPPING_ADDRESS_LEN {
        return Err(ShopError::validation(format!(
            "shipping address must be at least {} characters",
            MIN_SHIPPING_ADDRESS_LEN
        )));
    }
    Ok(())
}

pub fn line_total(unit_price: &BigDecimal, quantity: i32) -> BigDecimal {
    unit_price * &BigDecimal::from(quantity)
}

/// Sum of `price x quantity` in exact decimal arithmetic.
pub fn order_total<'a, I>(lines: I) -> BigDecimal
where
    I: IntoIterator<Item = (&'a BigDecimal, i32)>,
{
    lines
        .into_iter()
        .fold(BigDecimal::zero(), |acc, (price, quantity)| acc + line_total(price, quantity))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    pub user_id: i32,
    pub total_orders: i64,
    pub pending_orders: i64,
    pub completed_orders: i64,
    pub orders_by_status: BTreeMap<OrderStatus, i64>,
    pub total_spent: BigDecimal,
    pub total_reviews: i64,
}

impl UserStatistics {
    /// `paid_total` is the sum over orders currently in `paid`.
    pub fn from_counts(
        user_id: i32,
        counts: &[(OrderStatus, i64)],
        paid_total: Option<BigDecimal>,
        total_reviews: i64,
    ) -> Self {
        let mut orders_by_status: BTreeMap<OrderStatus, i64> =
            OrderStatus::ALL.into_iter().map(|status| (status, 0)).collect();
        for (status, count) in counts {
            *orders_by_status.entry(*status).or_insert(0) += count;
        }

        Self {
            user_id,
            total_orders: orders_by_status.values().sum(),
            pending_orders: orders_by_status[&OrderStatus::Pending],
            completed_orders: orders_by_status[&OrderStatus::Delivered],
            orders_by_status,
            total_spent: paid_total.unwrap_or_else(BigDecimal::zero),
            total_reviews,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn customer(id: i32) -> Principal {
        Principal {
            id,
            username: format!("user{id}"),
            is_superuser: false,
        }
    }

    fn admin() -> Principal {
        Principal {
            id: 99,
            username: "admin".to_string(),
            is_superuser: true,
        }
    }

    fn dec(s: &str) -> BigDecimal {
        s.parse().unwrap()
    }

    #[test]
    fn owner_cancels_pending_order_and_restores_stock() {
        let plan = plan_transition(&customer(1), 1, OrderStatus::Pending, OrderStatus::Cancelled)
            .unwrap();
        assert!(plan.restores_stock);
    }

    #[test]
    fn customer_cannot_cancel_someone_elses_order() {
        let err = plan_transition(&customer(2), 1, OrderStatus::Pending, OrderStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(err, ShopError::Forbidden(_)));
    }

    #[rstest]
    #[case(OrderStatus::Paid)]
    #[case(OrderStatus::Shipped)]
    #[case(OrderStatus::Delivered)]
    #[case(OrderStatus::Cancelled)]
    fn customer_cancel_outside_pending_is_invalid(#[case] from: OrderStatus) {
        let err = plan_transition(&customer(1), 1, from, OrderStatus::Cancelled).unwrap_err();
        assert_eq!(
            err,
            ShopError::InvalidTransition {
                from,
                to: OrderStatus::Cancelled
            }
        );
    }

    #[test]
    fn customer_cannot_advance_status() {
        let err =
            plan_transition(&customer(1), 1, OrderStatus::Pending, OrderStatus::Paid).unwrap_err();
        assert!(matches!(err, ShopError::Forbidden(_)));
    }

    #[test]
    fn admin_cancelling_paid_order_keeps_stock() {
        let plan =
            plan_transition(&admin(), 1, OrderStatus::Paid, OrderStatus::Cancelled).unwrap();
        assert!(!plan.restores_stock);
    }

    #[rstest]
    #[case(OrderStatus::Pending, OrderStatus::Paid)]
    #[case(OrderStatus::Pending, OrderStatus::Delivered)]
    #[case(OrderStatus::Paid, OrderStatus::Shipped)]
    #[case(OrderStatus::Shipped, OrderStatus::Pending)]
    fn admin_may_set_any_status_from_open_orders(#[case] from: OrderStatus, #[case] to: OrderStatus) {
        let plan = plan_transition(&admin(), 1, from, to).unwrap();
        assert!(!plan.restores_stock);
    }

    #[rstest]
    #[case(OrderStatus::Cancelled)]
    #[case(OrderStatus::Delivered)]
    fn terminal_states_stay_terminal_for_admins(#[case] from: OrderStatus) {
        assert!(plan_transition(&admin(), 1, from, OrderStatus::Pending).is_err());
    }

    #[test]
    fn status_round_trips_through_its_wire_name() {
        for status in OrderStatus::ALL {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!(matches!(
            "refunded".parse::<OrderStatus>(),
            Err(ShopError::Validation(_))
        ));
    }

    #[test]
    fn order_total_is_exact_decimal() {
        let a = dec("0.10");
        let b = dec("19.99");
        let total = order_total([(&a, 3), (&b, 2)]);
        assert_eq!(total, dec("40.28"));
    }

    #[test]
    fn empty_checkout_reports_empty_cart_first() {
        let request = CheckoutRequest {
            user_id: 1,
            shipping_address: String::new(),
            lines: vec![],
        };
        assert_eq!(request.validate(), Err(ShopError::EmptyCart));
    }

    #[test]
    fn checkout_rejects_short_address_and_bad_quantity() {
        let mut request = CheckoutRequest {
            user_id: 1,
            shipping_address: "short".to_string(),
            lines: vec![CheckoutLine {
                product_id: 1,
                quantity: 1,
                unit_price: None,
            }],
        };
        assert!(matches!(request.validate(), Err(ShopError::Validation(_))));

        request.shipping_address = "12 Long Street, Springfield".to_string();
        request.lines[0].quantity = 0;
        assert!(matches!(request.validate(), Err(ShopError::Validation(_))));

        request.lines[0].quantity = 2;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn statistics_fill_missing_statuses() {
        let stats = UserStatistics::from_counts(
            4,
            &[(OrderStatus::Pending, 2), (OrderStatus::Paid, 1), (OrderStatus::Delivered, 3)],
            Some(dec("15.50")),
            5,
        );
        assert_eq!(stats.total_orders, 6);
        assert_eq!(stats.pending_orders, 2);
        assert_eq!(stats.completed_orders, 3);
        assert_eq!(stats.orders_by_status[&OrderStatus::Cancelled], 0);
        assert_eq!(stats.total_spent, dec("15.50"));
        assert_eq!(stats.total_reviews, 5);
    }
}
