//! Ledger error model.

use thiserror::Error;

use crate::id::ProductId;
use crate::money::Money;

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level error.
///
/// Every variant carries the precondition that failed so callers can render a
/// precise message. Transactional operations roll back entirely before one of
/// these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A referenced user/product/order/coupon/address is absent.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Requested quantity exceeds the product's stock (or the product is inactive).
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// A line quantity was zero, negative or above the configured cap.
    #[error("invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity { product_id: ProductId, quantity: i64 },

    /// The coupon is inactive or outside its validity window.
    #[error("coupon {code} is not currently valid")]
    CouponExpired { code: String },

    /// The coupon already reached its usage cap.
    #[error("coupon {code} reached its usage limit of {limit}")]
    CouponUsageExceeded { code: String, limit: u32 },

    /// The order subtotal is below the coupon's minimum.
    #[error("coupon {code} requires a subtotal of at least {minimum} (got {subtotal})")]
    CouponMinimumNotMet {
        code: String,
        minimum: Money,
        subtotal: Money,
    },

    /// The user already reviewed the product.
    #[error("user {user_id} already reviewed product {product_id}")]
    DuplicateReview { user_id: String, product_id: String },

    /// The requested order or payment status change is not allowed.
    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    /// A generic invariant breach (negative totals, restrict rules, cycles).
    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    /// Malformed input (rating out of range, empty order, bad value).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency retries were exhausted.
    #[error("concurrent modification: {0}")]
    Concurrency(String),

    /// The persistence collaborator failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::ConstraintViolation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidStatusTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Short, stable name of the error kind (for logs and metrics labels).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::CouponExpired { .. } => "coupon_expired",
            Self::CouponUsageExceeded { .. } => "coupon_usage_exceeded",
            Self::CouponMinimumNotMet { .. } => "coupon_minimum_not_met",
            Self::DuplicateReview { .. } => "duplicate_review",
            Self::InvalidStatusTransition { .. } => "invalid_status_transition",
            Self::ConstraintViolation(_) => "constraint_violation",
            Self::Validation(_) => "validation",
            Self::Concurrency(_) => "concurrency",
            Self::Storage(_) => "storage",
        }
    }
}
