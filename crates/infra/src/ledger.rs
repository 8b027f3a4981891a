//! The order ledger engine (application-level orchestration).
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! command
//!   ↓
//! 1. begin a store transaction
//!   ↓
//! 2. read current state, apply the domain rules, write the results
//!   ↓
//! 3. commit (optimistic check; on conflict go back to 1, bounded)
//!   ↓
//! 4. publish the resulting events to the bus
//! ```
//!
//! Any error in step 2 drops the transaction, so nothing is persisted.
//! Events are only published once the commit has succeeded; a failed
//! publication is logged and never undoes the commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use orderledger_catalog::Product;
use orderledger_core::{
    AddressId, CouponUsageId, LedgerError, LedgerResult, OrderId, ProductId, ReviewId, UserId,
};
use orderledger_customers::User;
use orderledger_events::{Event, EventBus, EventEnvelope};
use orderledger_sales::{
    AddToCart, CartLine, CheckoutCart, CheckoutLine, CouponRedeemed, CouponUsage, LedgerEvent,
    Order, OrderHeader, OrderPlaced, OrderStatusChanged, PaymentStatusChanged, PlaceOrder,
    PricingPolicy, RecordPayment, RemoveFromCart, Review, ReviewSubmitted, SetCartQuantity,
    StockRestocked, SubmitReview, TransitionOrderStatus, coalesce_lines, normalize_code,
    order_number, price_order, verifies_purchase,
};

use crate::config::LedgerConfig;
use crate::store::{LedgerStore, StoreError, StoreTx};

/// A restock that could not be applied because the product is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SkippedRestock {
    order_id: OrderId,
    product_id: ProductId,
    quantity: u32,
}

/// What one attempt of an operation produced, applied only after commit.
struct Outcome<T> {
    value: T,
    events: Vec<LedgerEvent>,
    skipped_restocks: Vec<SkippedRestock>,
}

impl<T> Outcome<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
            skipped_restocks: Vec::new(),
        }
    }

    fn with_events(value: T, events: Vec<LedgerEvent>) -> Self {
        Self {
            value,
            events,
            skipped_restocks: Vec::new(),
        }
    }
}

/// Order fields shared by PlaceOrder and CheckoutCart.
struct OrderRequest<'a> {
    user_id: UserId,
    coupon_code: Option<&'a str>,
    shipping_address_id: Option<AddressId>,
    billing_address_id: Option<AddressId>,
    notes: Option<&'a str>,
    occurred_at: DateTime<Utc>,
}

/// Transactional engine over a [`LedgerStore`], publishing to an [`EventBus`].
pub struct OrderLedger<S, B> {
    store: S,
    bus: B,
    config: LedgerConfig,
    pricing: Arc<dyn PricingPolicy>,
}

impl<S, B> OrderLedger<S, B> {
    /// Build an engine whose pricing collaborator comes from `config`.
    pub fn new(store: S, bus: B, config: LedgerConfig) -> Self {
        let pricing = config.pricing();
        Self {
            store,
            bus,
            config,
            pricing,
        }
    }

    /// Replace the pricing collaborator.
    pub fn with_pricing(mut self, pricing: Arc<dyn PricingPolicy>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> OrderLedger<S, B>
where
    S: LedgerStore,
    B: EventBus<EventEnvelope<LedgerEvent>>,
{
    /// Turn `cmd.lines` into a pending order, decrementing stock and redeeming
    /// the coupon atomically. Cart lines for the ordered products are cleared.
    #[tracing::instrument(
        name = "place_order",
        skip_all,
        fields(user_id = %cmd.user_id, lines = cmd.lines.len())
    )]
    pub fn place_order(&self, cmd: PlaceOrder) -> LedgerResult<Order> {
        let lines = coalesce_lines(&cmd.lines, self.config.max_line_quantity)?;
        let request = OrderRequest {
            user_id: cmd.user_id,
            coupon_code: cmd.coupon_code.as_deref(),
            shipping_address_id: cmd.shipping_address_id,
            billing_address_id: cmd.billing_address_id,
            notes: cmd.notes.as_deref(),
            occurred_at: cmd.occurred_at,
        };

        let order = self.execute("place_order", |tx| {
            let outcome = self.place_in(tx, &request, &lines)?;
            for (product_id, _) in &lines {
                tx.remove_cart_line(cmd.user_id, *product_id)?;
            }
            Ok(outcome)
        })?;

        tracing::info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            total = %order.total_amount(),
            "order placed"
        );
        Ok(order)
    }

    /// PlaceOrder over the user's cart as it stands inside the transaction.
    /// The whole cart is consumed.
    #[tracing::instrument(name = "checkout_cart", skip_all, fields(user_id = %cmd.user_id))]
    pub fn checkout_cart(&self, cmd: CheckoutCart) -> LedgerResult<Order> {
        let request = OrderRequest {
            user_id: cmd.user_id,
            coupon_code: cmd.coupon_code.as_deref(),
            shipping_address_id: cmd.shipping_address_id,
            billing_address_id: cmd.billing_address_id,
            notes: cmd.notes.as_deref(),
            occurred_at: cmd.occurred_at,
        };

        let order = self.execute("checkout_cart", |tx| {
            let cart = tx.cart_lines(cmd.user_id)?;
            if cart.is_empty() {
                return Err(LedgerError::validation(format!(
                    "cart of user {} is empty",
                    cmd.user_id
                )));
            }
            let requested: Vec<CheckoutLine> = cart
                .iter()
                .map(|l| CheckoutLine::new(l.product_id, i64::from(l.quantity)))
                .collect();
            let lines = coalesce_lines(&requested, self.config.max_line_quantity)?;

            let outcome = self.place_in(tx, &request, &lines)?;
            for line in &cart {
                tx.remove_cart_line(cmd.user_id, line.product_id)?;
            }
            Ok(outcome)
        })?;

        tracing::info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            total = %order.total_amount(),
            "cart checked out"
        );
        Ok(order)
    }

    /// Move an order through its lifecycle. Cancelling before shipment
    /// returns every item to stock.
    #[tracing::instrument(
        name = "transition_order_status",
        skip_all,
        fields(order_id = %cmd.order_id, to = %cmd.new_status)
    )]
    pub fn transition_order_status(&self, cmd: TransitionOrderStatus) -> LedgerResult<Order> {
        let order = self.execute("transition_order_status", |tx| {
            let mut order = tx
                .order(cmd.order_id)?
                .ok_or_else(|| LedgerError::not_found("order", cmd.order_id))?;
            let change = order.transition(cmd.new_status, cmd.payment_status, cmd.occurred_at)?;

            let mut events = vec![LedgerEvent::OrderStatusChanged(OrderStatusChanged {
                order_id: order.id(),
                from: change.from,
                to: change.to,
                occurred_at: cmd.occurred_at,
            })];
            if let Some((from, to)) = change.payment {
                events.push(LedgerEvent::PaymentStatusChanged(PaymentStatusChanged {
                    order_id: order.id(),
                    from,
                    to,
                    occurred_at: cmd.occurred_at,
                }));
            }

            let mut skipped_restocks = Vec::new();
            if change.restock {
                for item in order.items() {
                    let Some(mut product) = tx.product(item.product_id())? else {
                        skipped_restocks.push(SkippedRestock {
                            order_id: order.id(),
                            product_id: item.product_id(),
                            quantity: item.quantity(),
                        });
                        continue;
                    };
                    product.restock(item.quantity(), cmd.occurred_at)?;
                    tx.save_product(&product)?;
                    events.push(LedgerEvent::StockRestocked(StockRestocked {
                        product_id: product.id(),
                        order_id: order.id(),
                        quantity: item.quantity(),
                        stock_quantity: product.stock_quantity(),
                        occurred_at: cmd.occurred_at,
                    }));
                }
            }

            tx.update_order(&order)?;
            Ok(Outcome {
                value: order,
                events,
                skipped_restocks,
            })
        })?;

        tracing::info!(
            status = %order.status(),
            payment = %order.payment_status(),
            "order status changed"
        );
        Ok(order)
    }

    /// Record a payment gateway outcome for an order.
    #[tracing::instrument(
        name = "record_payment",
        skip_all,
        fields(order_id = %cmd.order_id, to = %cmd.payment_status)
    )]
    pub fn record_payment(&self, cmd: RecordPayment) -> LedgerResult<Order> {
        let order = self.execute("record_payment", |tx| {
            let mut order = tx
                .order(cmd.order_id)?
                .ok_or_else(|| LedgerError::not_found("order", cmd.order_id))?;
            let from = order.record_payment(cmd.payment_status, cmd.occurred_at)?;
            tx.update_order(&order)?;

            let event = LedgerEvent::PaymentStatusChanged(PaymentStatusChanged {
                order_id: order.id(),
                from,
                to: cmd.payment_status,
                occurred_at: cmd.occurred_at,
            });
            Ok(Outcome::with_events(order, vec![event]))
        })?;

        tracing::info!(payment = %order.payment_status(), "payment recorded");
        Ok(order)
    }

    /// Store a review; verified only when `cmd.order_id` proves the purchase.
    ///
    /// A named order that does not exist is `NotFound`; one that exists but
    /// does not prove the purchase leaves the review unverified.
    #[tracing::instrument(
        name = "submit_review",
        skip_all,
        fields(user_id = %cmd.user_id, product_id = %cmd.product_id)
    )]
    pub fn submit_review(&self, cmd: SubmitReview) -> LedgerResult<Review> {
        let review = self.execute("submit_review", |tx| {
            tx.user(cmd.user_id)?
                .ok_or_else(|| LedgerError::not_found("user", cmd.user_id))?;
            tx.product(cmd.product_id)?
                .ok_or_else(|| LedgerError::not_found("product", cmd.product_id))?;
            if tx.review(cmd.user_id, cmd.product_id)?.is_some() {
                return Err(LedgerError::DuplicateReview {
                    user_id: cmd.user_id.to_string(),
                    product_id: cmd.product_id.to_string(),
                });
            }

            let verified_order = match cmd.order_id {
                Some(order_id) => {
                    let order = tx
                        .order(order_id)?
                        .ok_or_else(|| LedgerError::not_found("order", order_id))?;
                    verifies_purchase(&order, cmd.user_id, cmd.product_id).then(|| order.id())
                }
                None => None,
            };

            let review = Review::submit(
                ReviewId::new(),
                cmd.user_id,
                cmd.product_id,
                verified_order,
                cmd.rating,
                cmd.occurred_at,
            )?
            .with_text(cmd.title.clone(), cmd.comment.clone());
            tx.insert_review(&review)?;

            let event = LedgerEvent::ReviewSubmitted(ReviewSubmitted {
                review_id: review.id,
                product_id: review.product_id,
                user_id: review.user_id,
                rating: review.rating,
                is_verified_purchase: review.is_verified_purchase,
                occurred_at: cmd.occurred_at,
            });
            Ok(Outcome::with_events(review, vec![event]))
        })?;

        tracing::info!(
            review_id = %review.id,
            verified = review.is_verified_purchase,
            "review submitted"
        );
        Ok(review)
    }

    /// Add units of a product to the user's cart (upsert).
    #[tracing::instrument(
        name = "add_to_cart",
        skip_all,
        fields(user_id = %cmd.user_id, product_id = %cmd.product_id, quantity = cmd.quantity)
    )]
    pub fn add_to_cart(&self, cmd: AddToCart) -> LedgerResult<CartLine> {
        let line = self.execute("add_to_cart", |tx| {
            self.require_active_user(tx, cmd.user_id)?;
            let product = tx
                .product(cmd.product_id)?
                .ok_or_else(|| LedgerError::not_found("product", cmd.product_id))?;

            let line = match tx.cart_line(cmd.user_id, cmd.product_id)? {
                Some(mut line) => {
                    line.add(cmd.quantity, cmd.occurred_at)?;
                    line
                }
                None => CartLine::new(cmd.user_id, cmd.product_id, cmd.quantity, cmd.occurred_at)?,
            };
            self.check_cart_line(&product, &line)?;
            tx.save_cart_line(&line)?;
            Ok(Outcome::new(line))
        })?;

        tracing::debug!(quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    /// Replace the quantity of a cart line; zero removes it. Returns the line
    /// as stored, or `None` once removed.
    #[tracing::instrument(
        name = "set_cart_quantity",
        skip_all,
        fields(user_id = %cmd.user_id, product_id = %cmd.product_id, quantity = cmd.quantity)
    )]
    pub fn set_cart_quantity(&self, cmd: SetCartQuantity) -> LedgerResult<Option<CartLine>> {
        self.execute("set_cart_quantity", |tx| {
            let Some(mut line) = tx.cart_line(cmd.user_id, cmd.product_id)? else {
                return Err(LedgerError::not_found(
                    "cart line",
                    format!("{}/{}", cmd.user_id, cmd.product_id),
                ));
            };
            if cmd.quantity == 0 {
                tx.remove_cart_line(cmd.user_id, cmd.product_id)?;
                return Ok(Outcome::new(None));
            }

            line.set_quantity(cmd.quantity, cmd.occurred_at)?;
            let product = tx
                .product(cmd.product_id)?
                .ok_or_else(|| LedgerError::not_found("product", cmd.product_id))?;
            self.check_cart_line(&product, &line)?;
            tx.save_cart_line(&line)?;
            Ok(Outcome::new(Some(line)))
        })
    }

    /// Remove a product from the user's cart. Returns whether a line existed.
    #[tracing::instrument(
        name = "remove_from_cart",
        skip_all,
        fields(user_id = %cmd.user_id, product_id = %cmd.product_id)
    )]
    pub fn remove_from_cart(&self, cmd: RemoveFromCart) -> LedgerResult<bool> {
        self.execute("remove_from_cart", |tx| {
            let removed = tx.remove_cart_line(cmd.user_id, cmd.product_id)?;
            Ok(Outcome::new(removed))
        })
    }

    /// The user's cart, oldest line first.
    pub fn cart(&self, user_id: UserId) -> LedgerResult<Vec<CartLine>> {
        let mut tx = self.store.begin()?;
        Ok(tx.cart_lines(user_id)?)
    }

    pub fn order(&self, order_id: OrderId) -> LedgerResult<Order> {
        let mut tx = self.store.begin()?;
        tx.order(order_id)?
            .ok_or_else(|| LedgerError::not_found("order", order_id))
    }

    /// Run `work` in a transaction, re-running it on conflicts raised either
    /// by the work itself or by the commit.
    fn execute<T, F>(&self, operation: &'static str, mut work: F) -> LedgerResult<T>
    where
        F: FnMut(&mut S::Tx) -> LedgerResult<Outcome<T>>,
    {
        let mut retries = 0u32;
        loop {
            let mut tx = self.store.begin()?;
            let outcome = match work(&mut tx) {
                Ok(outcome) => outcome,
                Err(LedgerError::Concurrency(reason)) if retries < self.config.max_conflict_retries => {
                    retries += 1;
                    tracing::debug!(operation, retries, %reason, "conflict while running, retrying");
                    continue;
                }
                Err(err) => return Err(err),
            };

            match tx.commit() {
                Ok(()) => {
                    self.after_commit(outcome.events, &outcome.skipped_restocks);
                    return Ok(outcome.value);
                }
                Err(StoreError::Conflict(reason)) if retries < self.config.max_conflict_retries => {
                    retries += 1;
                    tracing::debug!(operation, retries, %reason, "commit conflict, retrying");
                }
                Err(StoreError::Conflict(reason)) => {
                    return Err(LedgerError::Concurrency(format!(
                        "{operation} gave up after {retries} retries: {reason}"
                    )));
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    fn after_commit(&self, events: Vec<LedgerEvent>, skipped_restocks: &[SkippedRestock]) {
        for skipped in skipped_restocks {
            tracing::warn!(
                order_id = %skipped.order_id,
                product_id = %skipped.product_id,
                quantity = skipped.quantity,
                "reconciliation: product no longer exists, restock skipped"
            );
        }

        let recorded_at = Utc::now();
        for event in events {
            let event_type = event.event_type();
            if let Err(err) = self.bus.publish(EventEnvelope::wrap(event, recorded_at)) {
                tracing::warn!(event_type, error = ?err, "event publication failed after commit");
            }
        }
    }

    fn require_active_user(&self, tx: &mut S::Tx, user_id: UserId) -> LedgerResult<User> {
        tx.user(user_id)?
            .filter(User::is_active)
            .ok_or_else(|| LedgerError::not_found("user", user_id))
    }

    fn check_cart_line(&self, product: &Product, line: &CartLine) -> LedgerResult<()> {
        if line.quantity > self.config.max_line_quantity {
            return Err(LedgerError::InvalidQuantity {
                product_id: line.product_id,
                quantity: i64::from(line.quantity),
            });
        }
        if !product.can_be_sold() {
            return Err(LedgerError::InsufficientStock {
                product_id: product.id(),
                requested: line.quantity,
                available: 0,
            });
        }
        Ok(())
    }

    /// The body of PlaceOrder: validate references, reserve stock, price,
    /// persist the order and redeem the coupon.
    fn place_in(
        &self,
        tx: &mut S::Tx,
        request: &OrderRequest<'_>,
        lines: &[(ProductId, u32)],
    ) -> LedgerResult<Outcome<Order>> {
        let at = request.occurred_at;
        let user = self.require_active_user(tx, request.user_id)?;

        for (address_id, shipping) in [
            (request.shipping_address_id, true),
            (request.billing_address_id, false),
        ] {
            let Some(address_id) = address_id else {
                continue;
            };
            let address = tx
                .address(address_id)?
                .filter(|a| a.belongs_to(user.id()))
                .ok_or_else(|| LedgerError::not_found("address", address_id))?;
            let usable = if shipping {
                address.can_ship_to()
            } else {
                address.can_bill_to()
            };
            if !usable {
                return Err(LedgerError::validation(format!(
                    "address {address_id} cannot be used for {}",
                    if shipping { "shipping" } else { "billing" }
                )));
            }
        }

        let mut products: Vec<(Product, u32)> = Vec::with_capacity(lines.len());
        for &(product_id, quantity) in lines {
            let mut product = tx
                .product(product_id)?
                .ok_or_else(|| LedgerError::not_found("product", product_id))?;
            product.reserve(quantity, at)?;
            products.push((product, quantity));
        }

        let coupon = match request.coupon_code {
            Some(code) => Some(
                tx.coupon_by_code(code)?
                    .ok_or_else(|| LedgerError::not_found("coupon", normalize_code(code)))?,
            ),
            None => None,
        };

        let order_id = OrderId::new();
        let snapshot: Vec<(&Product, u32)> = products.iter().map(|(p, q)| (p, *q)).collect();
        let priced = price_order(order_id, &snapshot, coupon.as_ref(), self.pricing.as_ref(), at)?;
        let header = OrderHeader {
            id: order_id,
            order_number: order_number(&self.config.order_prefix, order_id, at),
            user_id: user.id(),
            shipping_address_id: request.shipping_address_id,
            billing_address_id: request.billing_address_id,
            notes: request.notes.map(str::to_string),
        };
        let order = Order::place(header, priced, at)?;

        for (product, _) in &products {
            tx.save_product(product)?;
        }
        tx.insert_order(&order)?;

        let mut events = vec![LedgerEvent::OrderPlaced(OrderPlaced {
            order_id,
            order_number: order.order_number().to_string(),
            user_id: user.id(),
            item_count: order.items().len(),
            total_amount: order.total_amount(),
            occurred_at: at,
        })];

        if let Some(mut coupon) = coupon {
            coupon.redeem()?;
            tx.save_coupon(&coupon)?;
            tx.insert_coupon_usage(&CouponUsage {
                id: CouponUsageId::new(),
                coupon_id: coupon.id(),
                user_id: user.id(),
                order_id,
                discount_amount: order.discount_amount(),
                used_at: at,
            })?;
            events.push(LedgerEvent::CouponRedeemed(CouponRedeemed {
                coupon_id: coupon.id(),
                code: coupon.code().to_string(),
                order_id,
                user_id: user.id(),
                discount_amount: order.discount_amount(),
                occurred_at: at,
            }));
        }

        Ok(Outcome::with_events(order, events))
    }
}
