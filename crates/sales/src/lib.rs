//! Sales domain module: carts, orders, coupons and reviews.
//!
//! This crate contains the business rules of the order ledger, implemented
//! purely as deterministic domain logic (no IO, no storage). The transactional
//! orchestration that reads and writes these types lives in
//! `orderledger-infra`.

pub mod cart;
pub mod checkout;
pub mod command;
pub mod coupon;
pub mod event;
pub mod order;
pub mod pricing;
pub mod review;

pub use cart::CartLine;
pub use checkout::{CheckoutLine, PricedOrder, coalesce_lines, price_order};
pub use command::{
    AddToCart, CheckoutCart, PlaceOrder, RecordPayment, RemoveFromCart, SetCartQuantity,
    SubmitReview, TransitionOrderStatus,
};
pub use coupon::{Coupon, CouponUsage, DiscountType, normalize_code};
pub use event::{
    CouponRedeemed, LedgerEvent, OrderPlaced, OrderStatusChanged, PaymentStatusChanged,
    ReviewSubmitted, StockRestocked,
};
pub use order::{
    Order, OrderHeader, OrderItem, OrderStatus, OrderTotals, PaymentStatus, StatusChange,
    order_number,
};
pub use pricing::{Charges, FlatRatePricing, NoCharges, PricingPolicy, PricingQuote};
pub use review::{Review, verifies_purchase};
