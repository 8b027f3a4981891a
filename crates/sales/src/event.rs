//! Facts published after a ledger transaction commits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_core::{CouponId, Money, OrderId, ProductId, ReviewId, UserId};
use orderledger_events::Event;

use crate::order::{OrderStatus, PaymentStatus};

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub item_count: usize,
    pub total_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponRedeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRedeemed {
    pub coupon_id: CouponId,
    pub code: String,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub discount_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusChanged {
    pub order_id: OrderId,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockRestocked (units returned by a cancelled order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRestocked {
    pub product_id: ProductId,
    pub order_id: OrderId,
    pub quantity: u32,
    pub stock_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReviewSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSubmitted {
    pub review_id: ReviewId,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub rating: u8,
    pub is_verified_purchase: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    OrderPlaced(OrderPlaced),
    CouponRedeemed(CouponRedeemed),
    OrderStatusChanged(OrderStatusChanged),
    PaymentStatusChanged(PaymentStatusChanged),
    StockRestocked(StockRestocked),
    ReviewSubmitted(ReviewSubmitted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::OrderPlaced(_) => "sales.order.placed",
            LedgerEvent::CouponRedeemed(_) => "sales.coupon.redeemed",
            LedgerEvent::OrderStatusChanged(_) => "sales.order.status_changed",
            LedgerEvent::PaymentStatusChanged(_) => "sales.order.payment_status_changed",
            LedgerEvent::StockRestocked(_) => "catalog.product.restocked",
            LedgerEvent::ReviewSubmitted(_) => "catalog.review.submitted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::OrderPlaced(e) => e.occurred_at,
            LedgerEvent::CouponRedeemed(e) => e.occurred_at,
            LedgerEvent::OrderStatusChanged(e) => e.occurred_at,
            LedgerEvent::PaymentStatusChanged(e) => e.occurred_at,
            LedgerEvent::StockRestocked(e) => e.occurred_at,
            LedgerEvent::ReviewSubmitted(e) => e.occurred_at,
        }
    }

    fn aggregate_type(&self) -> &'static str {
        match self {
            LedgerEvent::OrderPlaced(_)
            | LedgerEvent::OrderStatusChanged(_)
            | LedgerEvent::PaymentStatusChanged(_) => "order",
            LedgerEvent::CouponRedeemed(_) => "coupon",
            LedgerEvent::StockRestocked(_) => "product",
            LedgerEvent::ReviewSubmitted(_) => "review",
        }
    }

    fn aggregate_id(&self) -> uuid::Uuid {
        match self {
            LedgerEvent::OrderPlaced(e) => e.order_id.into(),
            LedgerEvent::CouponRedeemed(e) => e.coupon_id.into(),
            LedgerEvent::OrderStatusChanged(e) => e.order_id.into(),
            LedgerEvent::PaymentStatusChanged(e) => e.order_id.into(),
            LedgerEvent::StockRestocked(e) => e.product_id.into(),
            LedgerEvent::ReviewSubmitted(e) => e.review_id.into(),
        }
    }
}
