use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_catalog::Product;
use orderledger_core::{
    AddressId, CouponId, LedgerError, LedgerResult, Money, OrderId, OrderItemId, ProductId, UserId,
};

use crate::checkout::PricedOrder;

/// Order fulfilment lifecycle.
///
/// ```text
/// pending → confirmed → processing → shipped → delivered
///    └──────────┴────────────┴→ cancelled      └──────┴→ refunded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Confirmed | Processing, Cancelled)
                | (Shipped | Delivered, Refunded)
        )
    }

    /// Goods have not left the warehouse, so cancelling returns them to stock.
    pub fn restocks_on_cancel(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Processing
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// The customer has (or is about to have) the goods.
    pub fn counts_as_purchase(self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Delivered)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment lifecycle, independent of fulfilment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn is_refund(self) -> bool {
        matches!(self, PaymentStatus::Refunded | PaymentStatus::PartiallyRefunded)
    }

    /// Transitions reachable by recording a gateway outcome. Refund statuses
    /// are only reachable together with the `refunded` order transition.
    pub fn can_record(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Paid) | (Pending, Failed) | (Failed, Paid) | (Failed, Pending)
        )
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot line of an order.
///
/// Name, SKU and unit price are copied from the product when the order is
/// placed; later catalog edits never reach historical orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    id: OrderItemId,
    order_id: OrderId,
    product_id: ProductId,
    product_name: String,
    product_sku: String,
    quantity: u32,
    unit_price: Money,
    total_price: Money,
}

impl OrderItem {
    /// Copy the product's current name, SKU and price into a new line.
    ///
    /// Fails when the line total does not fit the amount range.
    pub fn snapshot(order_id: OrderId, product: &Product, quantity: u32) -> LedgerResult<Self> {
        let unit_price = product.price();
        let total_price = unit_price.times(quantity)?;
        ensure_storable("total_price", total_price)?;
        Ok(Self {
            id: OrderItemId::new(),
            order_id,
            product_id: product.id(),
            product_name: product.name().to_string(),
            product_sku: product.sku().to_string(),
            quantity,
            unit_price,
            total_price,
        })
    }

    pub fn id(&self) -> OrderItemId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn product_name(&self) -> &str {
        &self.product_name
    }

    pub fn product_sku(&self) -> &str {
        &self.product_sku
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn total_price(&self) -> Money {
        self.total_price
    }

    pub fn is_consistent(&self) -> bool {
        self.quantity > 0
            && self
                .unit_price
                .times(self.quantity)
                .is_ok_and(|total| total == self.total_price)
    }
}

/// Monetary summary of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax_amount: Money,
    pub shipping_cost: Money,
    pub discount_amount: Money,
    pub total_amount: Money,
}

impl OrderTotals {
    /// Build totals, clamping the discount so the total never goes negative.
    ///
    /// Every part, and the resulting total, must fit the amount range.
    pub fn compute(
        subtotal: Money,
        tax_amount: Money,
        shipping_cost: Money,
        discount_amount: Money,
    ) -> LedgerResult<Self> {
        for (name, value) in [
            ("subtotal", subtotal),
            ("tax_amount", tax_amount),
            ("shipping_cost", shipping_cost),
            ("discount_amount", discount_amount),
        ] {
            if value.is_negative() {
                return Err(LedgerError::constraint(format!("{name} cannot be negative ({value})")));
            }
            ensure_storable(name, value)?;
        }

        let gross = subtotal + tax_amount + shipping_cost;
        let discount_amount = discount_amount.min(gross);
        let total_amount = gross
            .checked_sub(discount_amount)
            .ok_or_else(|| LedgerError::constraint("order total cannot be negative"))?;
        ensure_storable("total_amount", total_amount)?;

        Ok(Self {
            subtotal,
            tax_amount,
            shipping_cost,
            discount_amount,
            total_amount,
        })
    }

    /// `total == subtotal + tax + shipping - discount`, all parts non-negative.
    pub fn is_balanced(&self) -> bool {
        let parts = [
            self.subtotal,
            self.tax_amount,
            self.shipping_cost,
            self.discount_amount,
            self.total_amount,
        ];
        parts.iter().all(|m| !m.is_negative())
            && self.total_amount
                == self.subtotal + self.tax_amount + self.shipping_cost - self.discount_amount
    }
}

fn ensure_storable(name: &str, value: Money) -> LedgerResult<()> {
    if value.is_storable() {
        Ok(())
    } else {
        Err(LedgerError::constraint(format!("{name} {value} exceeds {}", Money::MAX)))
    }
}

/// Header fields of a new order that do not come from pricing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHeader {
    pub id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub shipping_address_id: Option<AddressId>,
    pub billing_address_id: Option<AddressId>,
    pub notes: Option<String>,
}

/// Outcome of a successful status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub payment: Option<(PaymentStatus, PaymentStatus)>,
    /// The order items must be returned to stock.
    pub restock: bool,
}

/// A placed order with its snapshot lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    user_id: UserId,
    status: OrderStatus,
    payment_status: PaymentStatus,
    #[serde(flatten)]
    totals: OrderTotals,
    shipping_address_id: Option<AddressId>,
    billing_address_id: Option<AddressId>,
    coupon_id: Option<CouponId>,
    notes: Option<String>,
    items: Vec<OrderItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Assemble a pending order from its header and priced lines.
    pub fn place(header: OrderHeader, priced: PricedOrder, at: DateTime<Utc>) -> LedgerResult<Self> {
        if priced.items.is_empty() {
            return Err(LedgerError::validation("order must contain at least one line"));
        }
        if priced.items.iter().any(|i| i.order_id() != header.id) {
            return Err(LedgerError::constraint("order item belongs to another order"));
        }
        if priced.items.iter().any(|i| !i.is_consistent()) {
            return Err(LedgerError::constraint(
                "order item total must equal quantity × unit price",
            ));
        }
        let subtotal: Money = priced.items.iter().map(OrderItem::total_price).sum();
        if subtotal != priced.totals.subtotal || !priced.totals.is_balanced() {
            return Err(LedgerError::constraint("order totals do not balance"));
        }

        Ok(Self {
            id: header.id,
            order_number: header.order_number,
            user_id: header.user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            totals: priced.totals,
            shipping_address_id: header.shipping_address_id,
            billing_address_id: header.billing_address_id,
            coupon_id: priced.coupon_id,
            notes: header.notes,
            items: priced.items,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn subtotal(&self) -> Money {
        self.totals.subtotal
    }

    pub fn discount_amount(&self) -> Money {
        self.totals.discount_amount
    }

    pub fn total_amount(&self) -> Money {
        self.totals.total_amount
    }

    pub fn shipping_address_id(&self) -> Option<AddressId> {
        self.shipping_address_id
    }

    pub fn billing_address_id(&self) -> Option<AddressId> {
        self.billing_address_id
    }

    pub fn coupon_id(&self) -> Option<CouponId> {
        self.coupon_id
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn item_for(&self, product_id: ProductId) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.product_id() == product_id)
    }

    /// Move the order to `next`.
    ///
    /// `refunded` additionally requires a paid order and `payment` to be a
    /// refund status; every other target rejects a payment change.
    pub fn transition(
        &mut self,
        next: OrderStatus,
        payment: Option<PaymentStatus>,
        at: DateTime<Utc>,
    ) -> LedgerResult<StatusChange> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(LedgerError::invalid_transition(from, next));
        }

        let payment_change = match (next, payment) {
            (OrderStatus::Refunded, Some(p))
                if p.is_refund() && self.payment_status == PaymentStatus::Paid =>
            {
                Some((self.payment_status, p))
            }
            (OrderStatus::Refunded, Some(p)) => {
                return Err(LedgerError::invalid_transition(
                    format!("payment {}", self.payment_status),
                    format!("payment {p}"),
                ));
            }
            (OrderStatus::Refunded, None) => {
                return Err(LedgerError::invalid_transition(
                    from,
                    "refunded (requires payment status refunded or partially_refunded)",
                ));
            }
            (_, Some(p)) => {
                return Err(LedgerError::validation(format!(
                    "payment status {p} can only accompany a refund"
                )));
            }
            (_, None) => None,
        };

        self.status = next;
        if let Some((_, p)) = payment_change {
            self.payment_status = p;
        }
        self.updated_at = at;

        Ok(StatusChange {
            from,
            to: next,
            payment: payment_change,
            restock: next == OrderStatus::Cancelled && from.restocks_on_cancel(),
        })
    }

    /// Record a payment gateway outcome. Returns the previous status.
    pub fn record_payment(
        &mut self,
        next: PaymentStatus,
        at: DateTime<Utc>,
    ) -> LedgerResult<PaymentStatus> {
        let from = self.payment_status;
        if self.status.is_terminal() || !from.can_record(next) {
            return Err(LedgerError::invalid_transition(
                format!("payment {from}"),
                format!("payment {next}"),
            ));
        }
        self.payment_status = next;
        self.updated_at = at;
        Ok(from)
    }
}

/// Human-readable order number: `<prefix>-<YYYYMMDD>-<16 hex>`.
///
/// The suffix is the 64-bit random tail of the (v7) order id. A clash is
/// still possible; the store reports it as a conflict and placement retries
/// with a fresh id.
pub fn order_number(prefix: &str, id: OrderId, at: DateTime<Utc>) -> String {
    let simple = id.as_uuid().simple().to_string();
    let suffix = &simple[simple.len() - 16..];
    format!(
        "{}-{}-{}",
        prefix,
        at.format("%Y%m%d"),
        suffix.to_ascii_uppercase()
    )
}
