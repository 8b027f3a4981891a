use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_core::{LedgerError, LedgerResult, OrderId, ProductId, ReviewId, UserId};

use crate::order::Order;

/// A product review; at most one per `(user_id, product_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub user_id: UserId,
    pub product_id: ProductId,
    /// The order that backs a verified purchase, if any.
    pub order_id: Option<OrderId>,
    pub rating: u8,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub is_verified_purchase: bool,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Build a review. `verified_order` is the order proving the purchase,
    /// already checked with [`verifies_purchase`].
    pub fn submit(
        id: ReviewId,
        user_id: UserId,
        product_id: ProductId,
        verified_order: Option<OrderId>,
        rating: u8,
        at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        if !(1..=5).contains(&rating) {
            return Err(LedgerError::validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        Ok(Self {
            id,
            user_id,
            product_id,
            order_id: verified_order,
            rating,
            title: None,
            comment: None,
            is_verified_purchase: verified_order.is_some(),
            created_at: at,
        })
    }

    /// Attach the free-text parts; blank strings are stored as absent.
    pub fn with_text(mut self, title: Option<String>, comment: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self.comment = comment.filter(|c| !c.trim().is_empty());
        self
    }
}

/// A review is a verified purchase when `order` belongs to the reviewer, has
/// reached the customer (shipped or delivered) and contains the product.
pub fn verifies_purchase(order: &Order, user_id: UserId, product_id: ProductId) -> bool {
    order.user_id() == user_id
        && order.status().counts_as_purchase()
        && order.item_for(product_id).is_some()
}
