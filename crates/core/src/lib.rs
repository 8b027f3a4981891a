//! `orderledger-core`: shared building blocks for the order ledger.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! strongly-typed identifiers, fixed-point money and the error taxonomy every
//! ledger operation reports through.

pub mod error;
pub mod id;
pub mod money;

pub use error::{LedgerError, LedgerResult};
pub use id::{
    AddressId, CategoryId, CouponId, CouponUsageId, OrderId, OrderItemId, PaymentMethodId,
    ProductId, ProductImageId, ReviewId, UserId,
};
pub use money::Money;
