//! Requests handled by the order ledger engine.
//!
//! Commands carry their business time (`occurred_at`) instead of reading a
//! clock, so replays and tests are deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_core::{AddressId, OrderId, ProductId, UserId};

use crate::checkout::CheckoutLine;
use crate::order::{OrderStatus, PaymentStatus};

/// Command: PlaceOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: UserId,
    pub lines: Vec<CheckoutLine>,
    pub coupon_code: Option<String>,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CheckoutCart (PlaceOrder over the user's current cart).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutCart {
    pub user_id: UserId,
    pub coupon_code: Option<String>,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionOrderStatus.
///
/// `payment_status` is only meaningful (and then required) for `refunded`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOrderStatus {
    pub order_id: OrderId,
    pub new_status: OrderStatus,
    pub payment_status: Option<PaymentStatus>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub order_id: OrderId,
    pub payment_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SubmitReview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReview {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub order_id: Option<OrderId>,
    pub rating: u8,
    pub title: Option<String>,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddToCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddToCart {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetCartQuantity. A quantity of zero removes the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCartQuantity {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveFromCart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveFromCart {
    pub user_id: UserId,
    pub product_id: ProductId,
}
