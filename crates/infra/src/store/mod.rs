//! Persistence boundary of the order ledger.
//!
//! The engine only ever talks to storage through a transaction: it begins one,
//! reads and writes entities through it, then commits. Dropping a transaction
//! without committing discards every write made through it, so a failed
//! operation leaves no partial stock decrement and no orphaned order item.
//!
//! ## Isolation
//!
//! Implementations must make `commit()` fail with [`StoreError::Conflict`]
//! whenever another transaction committed a change to something this one read
//! (a row, a unique key, or the membership of a dependent collection) after it
//! was read. The engine treats `Conflict` as retryable and re-runs the whole
//! operation against fresh state; that re-run is what turns the stock check
//! into a compare-and-decrement.
//!
//! ## Referential rules
//!
//! - deleting a user is restricted while orders reference it, otherwise it
//!   cascades to the profile, addresses, payment methods, cart lines and reviews
//! - deleting a category sets its children's parent link to null and is
//!   restricted while products reference it
//! - deleting a product is restricted while order items reference it,
//!   otherwise it cascades to images, cart lines and reviews
//! - category writes reject a parent link that would form a cycle

pub mod in_memory;

pub use in_memory::{InMemoryLedgerStore, InMemoryTx};

use std::sync::Arc;

use thiserror::Error;

use orderledger_catalog::{Category, Product, ProductImage};
use orderledger_core::{AddressId, CategoryId, LedgerError, OrderId, ProductId, UserId};
use orderledger_customers::{Address, PaymentMethod, Profile, User};
use orderledger_sales::{CartLine, Coupon, CouponUsage, Order, Review};

/// Store operation error.
///
/// These are infrastructure outcomes; domain rule violations are reported by
/// the domain crates as [`LedgerError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic check failed at commit. Retrying the operation may succeed.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Foreign key, unique or restrict rule violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The row addressed by a delete or update does not exist.
    #[error("{entity} '{id}' not found")]
    Missing { entity: &'static str, id: String },

    /// The store cannot serve requests (e.g. poisoned lock).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    pub fn missing(entity: &'static str, id: impl ToString) -> Self {
        Self::Missing {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => LedgerError::Concurrency(msg),
            StoreError::Constraint(msg) => LedgerError::ConstraintViolation(msg),
            StoreError::Missing { entity, id } => LedgerError::NotFound { entity, id },
            StoreError::Unavailable(msg) => LedgerError::Storage(msg),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One unit of work against the store.
///
/// Reads take `&mut self`: the transaction remembers what it saw so that
/// `commit()` can detect concurrent changes.
pub trait StoreTx {
    // --- customers ---------------------------------------------------------

    fn user(&mut self, id: UserId) -> StoreResult<Option<User>>;

    /// Insert or update a user. Emails are unique.
    fn save_user(&mut self, user: &User) -> StoreResult<()>;

    fn delete_user(&mut self, id: UserId) -> StoreResult<()>;

    fn profile(&mut self, user_id: UserId) -> StoreResult<Option<Profile>>;

    /// Insert the user's profile; a user has at most one.
    fn insert_profile(&mut self, profile: &Profile) -> StoreResult<()>;

    fn address(&mut self, id: AddressId) -> StoreResult<Option<Address>>;

    fn save_address(&mut self, address: &Address) -> StoreResult<()>;

    fn addresses(&mut self, user_id: UserId) -> StoreResult<Vec<Address>>;

    fn save_payment_method(&mut self, method: &PaymentMethod) -> StoreResult<()>;

    fn payment_methods(&mut self, user_id: UserId) -> StoreResult<Vec<PaymentMethod>>;

    // --- catalog -----------------------------------------------------------

    fn category(&mut self, id: CategoryId) -> StoreResult<Option<Category>>;

    /// Insert or update a category, rejecting a missing parent or a cycle.
    fn save_category(&mut self, category: &Category) -> StoreResult<()>;

    fn delete_category(&mut self, id: CategoryId) -> StoreResult<()>;

    fn product(&mut self, id: ProductId) -> StoreResult<Option<Product>>;

    /// Insert or update a product. SKUs are unique.
    fn save_product(&mut self, product: &Product) -> StoreResult<()>;

    fn delete_product(&mut self, id: ProductId) -> StoreResult<()>;

    fn save_image(&mut self, image: &ProductImage) -> StoreResult<()>;

    fn images(&mut self, product_id: ProductId) -> StoreResult<Vec<ProductImage>>;

    // --- cart --------------------------------------------------------------

    /// The user's cart, oldest line first.
    fn cart_lines(&mut self, user_id: UserId) -> StoreResult<Vec<CartLine>>;

    fn cart_line(&mut self, user_id: UserId, product_id: ProductId)
    -> StoreResult<Option<CartLine>>;

    fn save_cart_line(&mut self, line: &CartLine) -> StoreResult<()>;

    /// Returns whether a line was removed.
    fn remove_cart_line(&mut self, user_id: UserId, product_id: ProductId) -> StoreResult<bool>;

    // --- coupons -----------------------------------------------------------

    /// Look a coupon up by its normalised code.
    fn coupon_by_code(&mut self, code: &str) -> StoreResult<Option<Coupon>>;

    /// Insert or update a coupon. Codes are unique.
    fn save_coupon(&mut self, coupon: &Coupon) -> StoreResult<()>;

    fn coupon_usage(&mut self, order_id: OrderId) -> StoreResult<Option<CouponUsage>>;

    /// Record a redemption; at most one per order.
    fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> StoreResult<()>;

    // --- orders ------------------------------------------------------------

    fn order(&mut self, id: OrderId) -> StoreResult<Option<Order>>;

    /// Insert a new order with its items. Order numbers are unique.
    fn insert_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Replace the mutable state (statuses, timestamps) of an existing order.
    fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    // --- reviews -----------------------------------------------------------

    fn review(&mut self, user_id: UserId, product_id: ProductId) -> StoreResult<Option<Review>>;

    /// Insert a review; at most one per `(user_id, product_id)`.
    fn insert_review(&mut self, review: &Review) -> StoreResult<()>;

    fn reviews_for_product(&mut self, product_id: ProductId) -> StoreResult<Vec<Review>>;

    /// Make every write of this transaction visible atomically.
    fn commit(self) -> StoreResult<()>
    where
        Self: Sized;
}

/// Source of transactions.
pub trait LedgerStore: Send + Sync {
    type Tx: StoreTx;

    fn begin(&self) -> StoreResult<Self::Tx>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    type Tx = S::Tx;

    fn begin(&self) -> StoreResult<Self::Tx> {
        (**self).begin()
    }
}
