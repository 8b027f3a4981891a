//! Pure checkout computation: validate lines, snapshot items, apply the
//! coupon and the pricing collaborator, and produce balanced totals.
//!
//! Stock is not touched here; the caller reserves stock on the same product
//! values it passes in, inside its transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_catalog::Product;
use orderledger_core::{CouponId, LedgerError, LedgerResult, Money, OrderId, ProductId};

use crate::coupon::Coupon;
use crate::order::{OrderItem, OrderTotals};
use crate::pricing::{PricingPolicy, PricingQuote};

/// A requested `(product, quantity)` pair, as taken from a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl CheckoutLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Validate quantities and merge repeated products (first occurrence keeps
/// its position).
pub fn coalesce_lines(
    lines: &[CheckoutLine],
    max_line_quantity: u32,
) -> LedgerResult<Vec<(ProductId, u32)>> {
    if lines.is_empty() {
        return Err(LedgerError::validation("order must contain at least one line"));
    }

    let mut merged: Vec<(ProductId, u32)> = Vec::with_capacity(lines.len());
    for line in lines {
        let invalid = || LedgerError::InvalidQuantity {
            product_id: line.product_id,
            quantity: line.quantity,
        };
        let quantity = u32::try_from(line.quantity).map_err(|_| invalid())?;
        if quantity == 0 {
            return Err(invalid());
        }

        match merged.iter_mut().find(|(id, _)| *id == line.product_id) {
            Some((_, existing)) => *existing = existing.checked_add(quantity).ok_or_else(invalid)?,
            None => merged.push((line.product_id, quantity)),
        }
    }

    for (product_id, quantity) in &merged {
        if *quantity > max_line_quantity {
            return Err(LedgerError::InvalidQuantity {
                product_id: *product_id,
                quantity: i64::from(*quantity),
            });
        }
    }

    Ok(merged)
}

/// Items and totals of an order about to be placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub coupon_id: Option<CouponId>,
}

/// Snapshot `lines` into order items and compute the order totals.
///
/// When `coupon` is supplied every redemption precondition is checked against
/// the computed subtotal at time `at`.
pub fn price_order(
    order_id: OrderId,
    lines: &[(&Product, u32)],
    coupon: Option<&Coupon>,
    pricing: &dyn PricingPolicy,
    at: DateTime<Utc>,
) -> LedgerResult<PricedOrder> {
    let items = lines
        .iter()
        .map(|(product, quantity)| OrderItem::snapshot(order_id, product, *quantity))
        .collect::<LedgerResult<Vec<_>>>()?;
    let subtotal: Money = items.iter().map(OrderItem::total_price).sum();

    let discount_amount = match coupon {
        Some(coupon) => {
            coupon.check_redeemable(subtotal, at)?;
            coupon.discount_for(subtotal)?
        }
        None => Money::ZERO,
    };

    let charges = pricing.charges(&PricingQuote {
        subtotal,
        discount_amount,
        items: &items,
    })?;

    let totals = OrderTotals::compute(
        subtotal,
        charges.tax_amount,
        charges.shipping_cost,
        discount_amount,
    )?;

    Ok(PricedOrder {
        items,
        totals,
        coupon_id: coupon.map(Coupon::id),
    })
}
