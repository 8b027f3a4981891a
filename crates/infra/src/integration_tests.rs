//! Engine scenarios against the in-memory store and event bus.
//!
//! Tests: command → OrderLedger → InMemoryLedgerStore (commit) → InMemoryEventBus
//!
//! Verifies:
//! - stock, coupon usage and order rows change together or not at all
//! - concurrent checkouts never oversell or over-redeem
//! - status transitions restock and publish the right events

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

use chrono::{Duration, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use orderledger_catalog::{Category, Product};
use orderledger_core::{
    AddressId, CategoryId, CouponId, LedgerError, LedgerResult, Money, OrderId, ProductId, UserId,
};
use orderledger_customers::{Address, AddressKind, User};
use orderledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use orderledger_sales::{
    AddToCart, CartLine, CheckoutCart, CheckoutLine, Coupon, DiscountType, FlatRatePricing,
    LedgerEvent, Order, OrderHeader, OrderItem, OrderStatus, OrderTotals, PaymentStatus,
    PlaceOrder, PricedOrder, RecordPayment, RemoveFromCart, Review, SetCartQuantity,
    SubmitReview, TransitionOrderStatus, order_number,
};

use crate::config::LedgerConfig;
use crate::ledger::OrderLedger;
use crate::store::{
    InMemoryLedgerStore, InMemoryTx, LedgerStore, StoreError, StoreResult, StoreTx,
};

type Bus = Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>>;
type Ledger = OrderLedger<InMemoryLedgerStore, Bus>;

struct Fixture {
    ledger: Arc<Ledger>,
    store: InMemoryLedgerStore,
    bus: Bus,
    user: UserId,
    address: AddressId,
    category: CategoryId,
}

fn fixture() -> Fixture {
    let store = InMemoryLedgerStore::new();
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let category = Category::new(CategoryId::new(), "Hardware", None).unwrap();
    let category_id = category.id;
    store.seed(|tx| tx.save_category(&category)).unwrap();

    let ledger = OrderLedger::new(store.clone(), bus.clone(), LedgerConfig::default());
    let mut f = Fixture {
        ledger: Arc::new(ledger),
        store,
        bus,
        user: UserId::new(),
        address: AddressId::new(),
        category: category_id,
    };
    let (user, address) = f.add_user("ada@example.com");
    f.user = user;
    f.address = address;
    f
}

impl Fixture {
    fn add_user(&self, email: &str) -> (UserId, AddressId) {
        let user = User::register(UserId::new(), email, email, Utc::now()).unwrap();
        let address = Address::new(
            AddressId::new(),
            user.id(),
            AddressKind::Both,
            "1 Analytical Way",
            "London",
            "N1 9GU",
            "gb",
        )
        .unwrap();
        let ids = (user.id(), address.id);
        self.store
            .seed(|tx| {
                tx.save_user(&user)?;
                tx.save_address(&address)
            })
            .unwrap();
        ids
    }

    fn add_product(&self, sku: &str, price_cents: i64, stock: u32) -> ProductId {
        let product = Product::new(
            ProductId::new(),
            self.category,
            sku,
            sku,
            Money::from_cents(price_cents),
            stock,
            Utc::now(),
        )
        .unwrap();
        let id = product.id();
        self.store.seed(|tx| tx.save_product(&product)).unwrap();
        id
    }

    fn add_coupon(&self, coupon: &Coupon) {
        self.store.seed(|tx| tx.save_coupon(coupon)).unwrap();
    }

    fn product(&self, id: ProductId) -> Product {
        self.store.view(|tx| tx.product(id)).unwrap().unwrap()
    }

    fn coupon(&self, code: &str) -> Coupon {
        self.store.view(|tx| tx.coupon_by_code(code)).unwrap().unwrap()
    }

    fn place(&self, lines: &[(ProductId, i64)], coupon: Option<&str>) -> LedgerResult<Order> {
        place_as(&self.ledger, self.user, lines, coupon)
    }

    fn move_to(&self, order: OrderId, status: OrderStatus) -> LedgerResult<Order> {
        self.ledger.transition_order_status(TransitionOrderStatus {
            order_id: order,
            new_status: status,
            payment_status: None,
            occurred_at: Utc::now(),
        })
    }

    fn pay(&self, order: OrderId) {
        self.ledger
            .record_payment(RecordPayment {
                order_id: order,
                payment_status: PaymentStatus::Paid,
                occurred_at: Utc::now(),
            })
            .unwrap();
    }

    fn ship(&self, order: OrderId) {
        for status in [OrderStatus::Confirmed, OrderStatus::Processing, OrderStatus::Shipped] {
            self.move_to(order, status).unwrap();
        }
    }

    fn review(
        &self,
        user: UserId,
        product: ProductId,
        order: Option<OrderId>,
    ) -> LedgerResult<Review> {
        self.ledger.submit_review(SubmitReview {
            user_id: user,
            product_id: product,
            order_id: order,
            rating: 4,
            title: Some("Solid".to_string()),
            comment: None,
            occurred_at: Utc::now(),
        })
    }

    fn add_to_cart(&self, product: ProductId, quantity: i64) -> LedgerResult<CartLine> {
        self.ledger.add_to_cart(AddToCart {
            user_id: self.user,
            product_id: product,
            quantity,
            occurred_at: Utc::now(),
        })
    }
}

fn place_as(
    ledger: &Ledger,
    user: UserId,
    lines: &[(ProductId, i64)],
    coupon: Option<&str>,
) -> LedgerResult<Order> {
    ledger.place_order(PlaceOrder {
        user_id: user,
        lines: lines.iter().map(|&(p, q)| CheckoutLine::new(p, q)).collect(),
        coupon_code: coupon.map(str::to_string),
        shipping_address_id: None,
        billing_address_id: None,
        notes: None,
        occurred_at: Utc::now(),
    })
}

fn percent_coupon(code: &str, percent: i64) -> Coupon {
    let now = Utc::now();
    Coupon::new(
        CouponId::new(),
        code,
        DiscountType::Percentage,
        Decimal::from(percent),
        now - Duration::days(1),
        now + Duration::days(1),
    )
    .unwrap()
}

/// An order referencing `product` as if it had been placed long ago.
fn historical_order(user: UserId, product: &Product, quantity: u32) -> Order {
    let id = OrderId::new();
    let item = OrderItem::snapshot(id, product, quantity).unwrap();
    let totals =
        OrderTotals::compute(item.total_price(), Money::ZERO, Money::ZERO, Money::ZERO).unwrap();
    Order::place(
        OrderHeader {
            id,
            order_number: order_number("OLD", id, Utc::now()),
            user_id: user,
            shipping_address_id: None,
            billing_address_id: None,
            notes: None,
        },
        PricedOrder {
            items: vec![item],
            totals,
            coupon_id: None,
        },
        Utc::now(),
    )
    .unwrap()
}

/// Store that commits a competing write to `product` every time a
/// transaction begins, while `interfere` lasts.
struct Contended {
    inner: InMemoryLedgerStore,
    product: ProductId,
    interfere: AtomicU32,
    begun: AtomicU32,
}

impl LedgerStore for Contended {
    type Tx = InMemoryTx;

    fn begin(&self) -> StoreResult<InMemoryTx> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        let tx = self.inner.begin()?;
        if self.interfere.load(Ordering::SeqCst) > 0 {
            self.interfere.fetch_sub(1, Ordering::SeqCst);
            self.inner.seed(|other| {
                let product = other
                    .product(self.product)?
                    .ok_or_else(|| StoreError::missing("product", self.product))?;
                other.save_product(&product)
            })?;
        }
        Ok(tx)
    }
}

#[test]
fn last_unit_goes_to_exactly_one_of_two_concurrent_checkouts() {
    let f = fixture();
    let product = f.add_product("LAST-1", 2500, 1);
    let (rival, _) = f.add_user("grace@example.com");

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [f.user, rival]
        .into_iter()
        .map(|user| {
            let ledger = Arc::clone(&f.ledger);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                place_as(&ledger, user, &[(product, 1)], None)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(
        failure,
        LedgerError::InsufficientStock {
            product_id: product,
            requested: 1,
            available: 0
        }
    );
    assert_eq!(f.product(product).stock_quantity(), 0);
}

#[test]
fn concurrent_checkouts_never_oversell() {
    let f = fixture();
    let product = f.add_product("BULK-1", 100, 10);
    let buyers: Vec<UserId> = (0..8)
        .map(|n| f.add_user(&format!("buyer{n}@example.com")).0)
        .collect();

    let barrier = Arc::new(Barrier::new(buyers.len()));
    let handles: Vec<_> = buyers
        .into_iter()
        .map(|user| {
            let ledger = Arc::clone(&f.ledger);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                place_as(&ledger, user, &[(product, 3)], None)
            })
        })
        .collect();
    let sold: u32 = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap().ok())
        .map(|order| order.items()[0].quantity())
        .sum();

    assert_eq!(sold, 9);
    assert_eq!(f.product(product).stock_quantity(), 1);
}

#[test]
fn percentage_coupon_discounts_and_is_counted() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 2500, 10);
    f.add_coupon(&percent_coupon("SAVE10", 10).with_minimum_order_amount(Money::from_cents(5000)));

    let order = f.place(&[(product, 4)], Some("save10")).unwrap();

    assert_eq!(order.subtotal(), Money::from_cents(10000));
    assert_eq!(order.discount_amount(), Money::from_cents(1000));
    assert_eq!(order.total_amount(), Money::from_cents(9000));
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.payment_status(), PaymentStatus::Pending);

    let coupon = f.coupon("SAVE10");
    assert_eq!(coupon.used_count(), 1);
    assert_eq!(order.coupon_id(), Some(coupon.id()));
    let usage = f.store.view(|tx| tx.coupon_usage(order.id())).unwrap().unwrap();
    assert_eq!(usage.coupon_id, coupon.id());
    assert_eq!(usage.discount_amount, Money::from_cents(1000));
    assert_eq!(f.product(product).stock_quantity(), 6);
}

#[test]
fn coupon_below_minimum_fails_without_side_effects() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 2000, 10);
    f.add_coupon(&percent_coupon("SAVE10", 10).with_minimum_order_amount(Money::from_cents(5000)));

    let err = f.place(&[(product, 1)], Some("SAVE10")).unwrap_err();

    assert!(matches!(err, LedgerError::CouponMinimumNotMet { .. }));
    assert_eq!(f.product(product).stock_quantity(), 10);
    assert_eq!(f.coupon("SAVE10").used_count(), 0);
}

#[test]
fn coupon_usage_limit_is_enforced() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 100);
    f.add_coupon(&percent_coupon("FIVE", 5).with_usage_limit(5));

    for _ in 0..5 {
        f.place(&[(product, 1)], Some("FIVE")).unwrap();
    }
    let err = f.place(&[(product, 1)], Some("FIVE")).unwrap_err();

    assert_eq!(
        err,
        LedgerError::CouponUsageExceeded {
            code: "FIVE".to_string(),
            limit: 5
        }
    );
    assert_eq!(f.coupon("FIVE").used_count(), 5);
    assert_eq!(f.product(product).stock_quantity(), 95);
}

#[test]
fn single_use_coupon_is_redeemed_once_under_contention() {
    let f = fixture();
    let first = f.add_product("A-1", 1000, 10);
    let second = f.add_product("B-1", 1000, 10);
    f.add_coupon(&percent_coupon("ONCE", 50).with_usage_limit(1));
    let (rival, _) = f.add_user("grace@example.com");

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [(f.user, first), (rival, second)]
        .into_iter()
        .map(|(user, product)| {
            let ledger = Arc::clone(&f.ledger);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                place_as(&ledger, user, &[(product, 1)], Some("ONCE"))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(LedgerError::CouponUsageExceeded { .. })))
    );
    assert_eq!(f.coupon("ONCE").used_count(), 1);
    let remaining = f.product(first).stock_quantity() + f.product(second).stock_quantity();
    assert_eq!(remaining, 19);
}

#[test]
fn unknown_or_expired_coupons_are_rejected() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 10);
    let now = Utc::now();
    let expired = Coupon::new(
        CouponId::new(),
        "OLD",
        DiscountType::FixedAmount,
        Decimal::from(5),
        now - Duration::days(10),
        now - Duration::days(1),
    )
    .unwrap();
    f.add_coupon(&expired);

    assert_eq!(
        f.place(&[(product, 1)], Some(" nope ")).unwrap_err(),
        LedgerError::not_found("coupon", "NOPE")
    );
    assert!(matches!(
        f.place(&[(product, 1)], Some("OLD")).unwrap_err(),
        LedgerError::CouponExpired { .. }
    ));
    assert_eq!(f.product(product).stock_quantity(), 10);
}

#[test]
fn insufficient_stock_on_a_later_line_rolls_back_everything() {
    let f = fixture();
    let plenty = f.add_product("PLENTY-1", 1000, 10);
    let scarce = f.add_product("SCARCE-1", 1000, 1);
    f.add_coupon(&percent_coupon("SAVE10", 10));
    f.add_to_cart(plenty, 2).unwrap();

    let err = f.place(&[(plenty, 2), (scarce, 2)], Some("SAVE10")).unwrap_err();

    assert_eq!(
        err,
        LedgerError::InsufficientStock {
            product_id: scarce,
            requested: 2,
            available: 1
        }
    );
    assert_eq!(f.product(plenty).stock_quantity(), 10);
    assert_eq!(f.product(scarce).stock_quantity(), 1);
    assert_eq!(f.coupon("SAVE10").used_count(), 0);
    assert_eq!(f.ledger.cart(f.user).unwrap().len(), 1);
}

#[test]
fn inactive_products_cannot_be_ordered() {
    let f = fixture();
    let id = f.add_product("RETIRED-1", 1000, 10);
    let mut product = f.product(id);
    product.deactivate(Utc::now());
    f.store.seed(|tx| tx.save_product(&product)).unwrap();

    assert_eq!(
        f.place(&[(id, 1)], None).unwrap_err(),
        LedgerError::InsufficientStock {
            product_id: id,
            requested: 1,
            available: 0
        }
    );
    assert!(matches!(
        f.add_to_cart(id, 1).unwrap_err(),
        LedgerError::InsufficientStock { .. }
    ));
}

#[test]
fn order_lines_are_validated() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 10);

    assert!(matches!(f.place(&[], None), Err(LedgerError::Validation(_))));
    assert!(matches!(
        f.place(&[(product, 0)], None),
        Err(LedgerError::InvalidQuantity { quantity: 0, .. })
    ));
    assert!(matches!(
        f.place(&[(product, -3)], None),
        Err(LedgerError::InvalidQuantity { .. })
    ));
    assert!(matches!(
        f.place(&[(ProductId::new(), 1)], None),
        Err(LedgerError::NotFound { entity: "product", .. })
    ));
    assert!(matches!(
        place_as(&f.ledger, UserId::new(), &[(product, 1)], None),
        Err(LedgerError::NotFound { entity: "user", .. })
    ));
    assert_eq!(f.product(product).stock_quantity(), 10);
}

#[test]
fn duplicate_lines_are_coalesced() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);

    let order = f.place(&[(product, 2), (product, 3)], None).unwrap();

    assert_eq!(order.items().len(), 1);
    assert_eq!(order.items()[0].quantity(), 5);
    assert_eq!(order.subtotal(), Money::from_cents(5000));
    assert_eq!(f.product(product).stock_quantity(), 0);
}

#[test]
fn addresses_must_belong_to_the_buyer() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let (_, foreign) = f.add_user("grace@example.com");

    let place = |address: AddressId| {
        f.ledger.place_order(PlaceOrder {
            user_id: f.user,
            lines: vec![CheckoutLine::new(product, 1)],
            coupon_code: None,
            shipping_address_id: Some(address),
            billing_address_id: Some(address),
            notes: Some("leave at the door".to_string()),
            occurred_at: Utc::now(),
        })
    };

    assert_eq!(
        place(foreign).unwrap_err(),
        LedgerError::not_found("address", foreign)
    );
    let order = place(f.address).unwrap();
    assert_eq!(order.shipping_address_id(), Some(f.address));
    assert_eq!(order.notes(), Some("leave at the door"));
}

#[test]
fn configured_pricing_adds_tax_and_shipping() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 2500, 10);
    let ledger = OrderLedger::new(f.store.clone(), f.bus.clone(), LedgerConfig::default())
        .with_pricing(Arc::new(FlatRatePricing {
            tax_rate_percent: Decimal::from(10),
            flat_shipping: Money::from_cents(500),
            free_shipping_over: None,
        }));

    let order = place_as(&ledger, f.user, &[(product, 2)], None).unwrap();

    assert_eq!(order.subtotal(), Money::from_cents(5000));
    assert_eq!(order.totals().tax_amount, Money::from_cents(500));
    assert_eq!(order.totals().shipping_cost, Money::from_cents(500));
    assert_eq!(order.total_amount(), Money::from_cents(6000));
    assert!(order.totals().is_balanced());
}

#[test]
fn order_numbers_use_the_configured_prefix() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 10);
    let config = LedgerConfig {
        order_prefix: "SHOP".to_string(),
        ..LedgerConfig::default()
    };
    let ledger = OrderLedger::new(f.store.clone(), f.bus.clone(), config);

    let first = place_as(&ledger, f.user, &[(product, 1)], None).unwrap();
    let second = place_as(&ledger, f.user, &[(product, 1)], None).unwrap();

    assert!(first.order_number().starts_with("SHOP-"));
    assert_ne!(first.order_number(), second.order_number());
}

#[test]
fn cancelling_from_processing_restocks() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let order = f.place(&[(product, 2)], None).unwrap();
    assert_eq!(f.product(product).stock_quantity(), 3);

    f.move_to(order.id(), OrderStatus::Confirmed).unwrap();
    f.move_to(order.id(), OrderStatus::Processing).unwrap();
    let events = f.bus.subscribe();
    let cancelled = f.move_to(order.id(), OrderStatus::Cancelled).unwrap();

    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert_eq!(f.product(product).stock_quantity(), 5);
    let restocked: Vec<_> = events
        .drain()
        .into_iter()
        .filter_map(|e| match e.into_payload() {
            LedgerEvent::StockRestocked(r) => Some(r),
            _ => None,
        })
        .collect();
    assert_eq!(restocked.len(), 1);
    assert_eq!(restocked[0].quantity, 2);
    assert_eq!(restocked[0].stock_quantity, 5);
}

#[test]
fn cancelling_does_not_release_coupon_usage() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    f.add_coupon(&percent_coupon("SAVE10", 10));
    let order = f.place(&[(product, 1)], Some("SAVE10")).unwrap();

    f.move_to(order.id(), OrderStatus::Cancelled).unwrap();

    assert_eq!(f.coupon("SAVE10").used_count(), 1);
    assert!(f.store.view(|tx| tx.coupon_usage(order.id())).unwrap().is_some());
}

#[test]
fn line_totals_beyond_the_amount_range_fail_cleanly() {
    let f = fixture();
    let product = f.add_product("YACHT-1", 9_999_999_999, 5);
    let events = f.bus.subscribe();

    let err = f.place(&[(product, 2)], None).unwrap_err();

    assert!(matches!(err, LedgerError::ConstraintViolation(_)));
    assert_eq!(f.product(product).stock_quantity(), 5);
    assert!(events.drain().is_empty());
    assert_eq!(f.place(&[(product, 1)], None).unwrap().total_amount(), Money::MAX);
}

#[test]
fn invalid_transitions_leave_the_order_unchanged() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let order = f.place(&[(product, 1)], None).unwrap();

    assert!(matches!(
        f.move_to(order.id(), OrderStatus::Shipped),
        Err(LedgerError::InvalidStatusTransition { .. })
    ));
    assert!(matches!(
        f.move_to(order.id(), OrderStatus::Refunded),
        Err(LedgerError::InvalidStatusTransition { .. })
    ));
    assert!(matches!(
        f.move_to(OrderId::new(), OrderStatus::Confirmed),
        Err(LedgerError::NotFound { entity: "order", .. })
    ));
    assert_eq!(f.ledger.order(order.id()).unwrap().status(), OrderStatus::Pending);
}

#[test]
fn refunds_carry_a_payment_status_and_do_not_restock() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let order = f.place(&[(product, 2)], None).unwrap();
    f.ship(order.id());
    let refund = || {
        f.ledger.transition_order_status(TransitionOrderStatus {
            order_id: order.id(),
            new_status: OrderStatus::Refunded,
            payment_status: Some(PaymentStatus::Refunded),
            occurred_at: Utc::now(),
        })
    };

    assert!(matches!(
        refund(),
        Err(LedgerError::InvalidStatusTransition { .. })
    ));
    let unpaid = f.ledger.order(order.id()).unwrap();
    assert_eq!(unpaid.status(), OrderStatus::Shipped);
    assert_eq!(unpaid.payment_status(), PaymentStatus::Pending);

    f.pay(order.id());
    let refunded = refund().unwrap();

    assert_eq!(refunded.status(), OrderStatus::Refunded);
    assert_eq!(refunded.payment_status(), PaymentStatus::Refunded);
    assert_eq!(f.product(product).stock_quantity(), 3);
}

#[test]
fn payment_outcomes_follow_the_payment_lifecycle() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let order = f.place(&[(product, 1)], None).unwrap();
    let record = |status| {
        f.ledger.record_payment(RecordPayment {
            order_id: order.id(),
            payment_status: status,
            occurred_at: Utc::now(),
        })
    };

    assert_eq!(record(PaymentStatus::Failed).unwrap().payment_status(), PaymentStatus::Failed);
    assert_eq!(record(PaymentStatus::Paid).unwrap().payment_status(), PaymentStatus::Paid);
    assert!(matches!(
        record(PaymentStatus::Refunded),
        Err(LedgerError::InvalidStatusTransition { .. })
    ));

    f.move_to(order.id(), OrderStatus::Cancelled).unwrap();
    assert!(record(PaymentStatus::Pending).is_err());
}

#[test]
fn restocking_a_deleted_product_is_skipped() {
    let f = fixture();
    let ghost = Product::new(
        ProductId::new(),
        f.category,
        "GONE-1",
        "Discontinued",
        Money::from_cents(700),
        0,
        Utc::now(),
    )
    .unwrap();
    let order = historical_order(f.user, &ghost, 3);
    f.store.seed(|tx| tx.import_order(&order)).unwrap();
    let events = f.bus.subscribe();

    let cancelled = f.move_to(order.id(), OrderStatus::Cancelled).unwrap();

    assert_eq!(cancelled.status(), OrderStatus::Cancelled);
    assert!(f.store.view(|tx| tx.product(ghost.id())).unwrap().is_none());
    let kinds: Vec<_> = events.drain().iter().map(|e| e.event_type().to_string()).collect();
    assert_eq!(kinds, vec!["sales.order.status_changed".to_string()]);
}

#[test]
fn reviews_are_verified_only_by_a_delivered_purchase() {
    let f = fixture();
    let bought = f.add_product("WIDGET-1", 1000, 5);
    let browsed = f.add_product("GADGET-1", 1000, 5);
    let order = f.place(&[(bought, 1)], None).unwrap();

    // not yet shipped
    let early = f.review(f.user, bought, Some(order.id())).unwrap();
    assert!(!early.is_verified_purchase);
    assert_eq!(early.order_id, None);

    let (other, _) = f.add_user("grace@example.com");
    f.ship(order.id());
    let borrowed = f.review(other, bought, Some(order.id())).unwrap();
    assert!(!borrowed.is_verified_purchase, "someone else's order proves nothing");

    let unverified = f.review(f.user, browsed, None).unwrap();
    assert!(!unverified.is_verified_purchase);
    assert_eq!(unverified.order_id, None);
    assert_eq!(unverified.title.as_deref(), Some("Solid"));
}

#[test]
fn shipped_order_verifies_a_review() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let order = f.place(&[(product, 1)], None).unwrap();
    f.ship(order.id());
    f.move_to(order.id(), OrderStatus::Delivered).unwrap();

    let review = f.review(f.user, product, Some(order.id())).unwrap();

    assert!(review.is_verified_purchase);
    assert_eq!(review.order_id, Some(order.id()));
}

#[test]
fn second_review_of_a_product_is_rejected() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    f.review(f.user, product, None).unwrap();

    assert_eq!(
        f.review(f.user, product, None).unwrap_err(),
        LedgerError::DuplicateReview {
            user_id: f.user.to_string(),
            product_id: product.to_string()
        }
    );
    let stored = f
        .store
        .view(|tx| tx.reviews_for_product(product))
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn concurrent_reviews_of_one_product_store_exactly_one() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = Arc::clone(&f.ledger);
            let barrier = Arc::clone(&barrier);
            let user = f.user;
            std::thread::spawn(move || {
                barrier.wait();
                ledger.submit_review(SubmitReview {
                    user_id: user,
                    product_id: product,
                    order_id: None,
                    rating: 3,
                    title: None,
                    comment: None,
                    occurred_at: Utc::now(),
                })
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let failure = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(
        failure,
        LedgerError::DuplicateReview {
            user_id: f.user.to_string(),
            product_id: product.to_string()
        }
    );
    let stored = f
        .store
        .view(|tx| tx.reviews_for_product(product))
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[test]
fn reviews_naming_a_missing_order_are_rejected() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let missing = OrderId::new();

    assert_eq!(
        f.review(f.user, product, Some(missing)).unwrap_err(),
        LedgerError::not_found("order", missing)
    );
    assert!(f.store.view(|tx| tx.review(f.user, product)).unwrap().is_none());
}

#[test]
fn review_ratings_are_bounded() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let submit = |rating| {
        f.ledger.submit_review(SubmitReview {
            user_id: f.user,
            product_id: product,
            order_id: None,
            rating,
            title: None,
            comment: None,
            occurred_at: Utc::now(),
        })
    };

    assert!(matches!(submit(0), Err(LedgerError::Validation(_))));
    assert!(matches!(submit(6), Err(LedgerError::Validation(_))));
    assert_eq!(submit(5).unwrap().rating, 5);
}

#[test]
fn cart_upserts_and_checks_out() {
    let f = fixture();
    let widget = f.add_product("WIDGET-1", 1000, 10);
    let gadget = f.add_product("GADGET-1", 500, 10);

    f.add_to_cart(widget, 1).unwrap();
    assert_eq!(f.add_to_cart(widget, 2).unwrap().quantity, 3);
    f.add_to_cart(gadget, 1).unwrap();
    assert_eq!(f.ledger.cart(f.user).unwrap().len(), 2);

    let order = f
        .ledger
        .checkout_cart(CheckoutCart {
            user_id: f.user,
            coupon_code: None,
            shipping_address_id: Some(f.address),
            billing_address_id: None,
            notes: None,
            occurred_at: Utc::now(),
        })
        .unwrap();

    assert_eq!(order.items().len(), 2);
    assert_eq!(order.subtotal(), Money::from_cents(3500));
    assert!(f.ledger.cart(f.user).unwrap().is_empty());
    assert_eq!(f.product(widget).stock_quantity(), 7);
}

#[test]
fn checking_out_an_empty_cart_fails() {
    let f = fixture();
    let err = f
        .ledger
        .checkout_cart(CheckoutCart {
            user_id: f.user,
            coupon_code: None,
            shipping_address_id: None,
            billing_address_id: None,
            notes: None,
            occurred_at: Utc::now(),
        })
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[test]
fn placing_an_order_clears_only_the_ordered_cart_lines() {
    let f = fixture();
    let widget = f.add_product("WIDGET-1", 1000, 10);
    let gadget = f.add_product("GADGET-1", 500, 10);
    f.add_to_cart(widget, 1).unwrap();
    f.add_to_cart(gadget, 1).unwrap();

    f.place(&[(widget, 1)], None).unwrap();

    let cart = f.ledger.cart(f.user).unwrap();
    assert_eq!(cart.len(), 1);
    assert_eq!(cart[0].product_id, gadget);
}

#[test]
fn cart_quantities_can_be_replaced_and_removed() {
    let f = fixture();
    let widget = f.add_product("WIDGET-1", 1000, 10);
    let set = |quantity| {
        f.ledger.set_cart_quantity(SetCartQuantity {
            user_id: f.user,
            product_id: widget,
            quantity,
            occurred_at: Utc::now(),
        })
    };

    assert!(matches!(set(2), Err(LedgerError::NotFound { .. })));
    f.add_to_cart(widget, 1).unwrap();
    assert_eq!(set(4).unwrap().map(|l| l.quantity), Some(4));
    assert!(matches!(set(-1), Err(LedgerError::InvalidQuantity { .. })));
    assert_eq!(set(0).unwrap(), None);
    assert!(f.ledger.cart(f.user).unwrap().is_empty());

    f.add_to_cart(widget, 1).unwrap();
    let remove = || {
        f.ledger.remove_from_cart(RemoveFromCart {
            user_id: f.user,
            product_id: widget,
        })
    };
    assert!(remove().unwrap());
    assert!(!remove().unwrap());
}

#[test]
fn cart_lines_respect_the_quantity_cap() {
    let f = fixture();
    let widget = f.add_product("WIDGET-1", 1000, 10);

    f.add_to_cart(widget, 999).unwrap();
    assert!(matches!(
        f.add_to_cart(widget, 2),
        Err(LedgerError::InvalidQuantity { quantity: 1001, .. })
    ));
    assert_eq!(f.ledger.cart(f.user).unwrap()[0].quantity, 999);
}

#[test]
fn committed_operations_publish_events_and_failures_publish_none() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 2500, 10);
    f.add_coupon(&percent_coupon("SAVE10", 10));
    let events = f.bus.subscribe();

    let order = f.place(&[(product, 2)], Some("SAVE10")).unwrap();
    let _ = f.place(&[(product, 50)], None);

    let published = events.drain();
    let kinds: Vec<&str> = published.iter().map(|e| e.event_type()).collect();
    assert_eq!(kinds, vec!["sales.order.placed", "sales.coupon.redeemed"]);
    assert_eq!(published[0].aggregate_id(), *order.id().as_uuid());
    match published[0].payload() {
        LedgerEvent::OrderPlaced(placed) => {
            assert_eq!(placed.order_number, order.order_number());
            assert_eq!(placed.total_amount, Money::from_cents(4500));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let json = serde_json::to_value(published[1].payload()).unwrap();
    assert_eq!(json["type"], "coupon_redeemed");
    assert_eq!(json["code"], "SAVE10");
}

#[test]
fn conflicting_commits_are_retried() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let store = Contended {
        inner: f.store.clone(),
        product,
        interfere: AtomicU32::new(2),
        begun: AtomicU32::new(0),
    };
    let ledger = OrderLedger::new(store, f.bus.clone(), LedgerConfig::default());

    let order = ledger
        .place_order(PlaceOrder {
            user_id: f.user,
            lines: vec![CheckoutLine::new(product, 1)],
            coupon_code: None,
            shipping_address_id: None,
            billing_address_id: None,
            notes: None,
            occurred_at: Utc::now(),
        })
        .unwrap();

    assert_eq!(ledger.store().begun.load(Ordering::SeqCst), 3);
    assert_eq!(f.product(product).stock_quantity(), 4);
    assert!(f.ledger.order(order.id()).is_ok());
}

#[test]
fn exhausted_retries_surface_as_concurrency_errors() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    let store = Contended {
        inner: f.store.clone(),
        product,
        interfere: AtomicU32::new(u32::MAX),
        begun: AtomicU32::new(0),
    };
    let config = LedgerConfig {
        max_conflict_retries: 2,
        ..LedgerConfig::default()
    };
    let ledger = OrderLedger::new(store, f.bus.clone(), config);

    let err = ledger
        .add_to_cart(AddToCart {
            user_id: f.user,
            product_id: product,
            quantity: 1,
            occurred_at: Utc::now(),
        })
        .unwrap_err();

    assert!(matches!(err, LedgerError::Concurrency(_)));
    assert_eq!(ledger.store().begun.load(Ordering::SeqCst), 3);
    assert!(f.ledger.cart(f.user).unwrap().is_empty());
}

#[test]
fn users_with_orders_cannot_be_deleted() {
    let f = fixture();
    let product = f.add_product("WIDGET-1", 1000, 5);
    f.place(&[(product, 1)], None).unwrap();

    let err = f.store.seed(|tx| tx.delete_user(f.user)).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));

    let err = f.store.seed(|tx| tx.delete_product(product)).unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)));
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

    #[test]
    fn stock_is_never_oversold(
        stock in 0u32..20,
        requests in prop::collection::vec(1i64..6, 1..12),
    ) {
        let f = fixture();
        let product = f.add_product("PROP-1", 100, stock);

        let mut sold = 0u32;
        for quantity in requests {
            match f.place(&[(product, quantity)], None) {
                Ok(order) => sold += order.items()[0].quantity(),
                Err(LedgerError::InsufficientStock { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }

        prop_assert!(sold <= stock);
        prop_assert_eq!(f.product(product).stock_quantity(), stock - sold);
    }
}
