//! Demo: one customer's checkout, from cart to verified review, against the
//! in-memory store. Prints the final order as JSON.

use std::sync::Arc;

use anyhow::Context;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use orderledger_catalog::{Category, Product, ProductImage};
use orderledger_core::{
    AddressId, CategoryId, CouponId, Money, PaymentMethodId, ProductId, ProductImageId, UserId,
};
use orderledger_customers::{
    Address, AddressKind, PaymentMethod, PaymentMethodKind, Profile, User,
};
use orderledger_events::{EventBus, EventEnvelope, InMemoryEventBus};
use orderledger_infra::{InMemoryLedgerStore, LedgerConfig, OrderLedger, StoreTx};
use orderledger_sales::{
    AddToCart, CheckoutCart, Coupon, DiscountType, LedgerEvent, OrderStatus, PaymentStatus,
    RecordPayment, SubmitReview, TransitionOrderStatus,
};

struct Demo {
    user: UserId,
    address: AddressId,
    kettle: ProductId,
    mugs: ProductId,
}

fn seed(store: &InMemoryLedgerStore) -> anyhow::Result<Demo> {
    let now = Utc::now();
    let user = User::register(UserId::new(), "ada@example.com", "ada", now)?;
    let profile = Profile::new(user.id(), "Ada", "Lovelace");
    let mut address = Address::new(
        AddressId::new(),
        user.id(),
        AddressKind::Both,
        "12 St James's Square",
        "London",
        "SW1Y 4LB",
        "GB",
    )?;
    address.is_default = true;
    let card = PaymentMethod::new(
        PaymentMethodId::new(),
        user.id(),
        PaymentMethodKind::CreditCard,
        "demo-gateway",
        Some("4242".to_string()),
    )?;

    let kitchen = Category::new(CategoryId::new(), "Kitchen", None)?;
    let tea = Category::new(CategoryId::new(), "Tea", Some(kitchen.id))?;
    let kettle = Product::new(
        ProductId::new(),
        kitchen.id,
        "KET-01",
        "Stovetop kettle",
        Money::from_cents(4500),
        12,
        now,
    )?;
    let mugs = Product::new(
        ProductId::new(),
        tea.id,
        "MUG-02",
        "Stoneware mugs (pair)",
        Money::from_cents(1800),
        40,
        now,
    )?;
    let mut photo = ProductImage::new(
        ProductImageId::new(),
        kettle.id(),
        "https://cdn.example.com/ket-01.jpg",
    )?;
    photo.is_primary = true;

    let welcome = Coupon::new(
        CouponId::new(),
        "welcome10",
        DiscountType::Percentage,
        Decimal::from(10),
        now - Duration::days(1),
        now + Duration::days(30),
    )?
    .with_minimum_order_amount(Money::from_cents(5000))
    .with_usage_limit(100)
    .with_description("10% off a first order over 50.00");

    store
        .seed(|tx| {
            tx.save_user(&user)?;
            tx.insert_profile(&profile)?;
            tx.save_address(&address)?;
            tx.save_payment_method(&card)?;
            tx.save_category(&kitchen)?;
            tx.save_category(&tea)?;
            tx.save_product(&kettle)?;
            tx.save_product(&mugs)?;
            tx.save_image(&photo)?;
            tx.save_coupon(&welcome)
        })
        .context("seeding the demo catalog")?;

    tracing::info!(user_id = %user.id(), "demo catalog seeded");
    Ok(Demo {
        user: user.id(),
        address: address.id,
        kettle: kettle.id(),
        mugs: mugs.id(),
    })
}

fn main() -> anyhow::Result<()> {
    let config = LedgerConfig::from_env().context("reading ORDER_LEDGER_* configuration")?;
    orderledger_observability::init(config.log_format);

    let store = InMemoryLedgerStore::new();
    let demo = seed(&store)?;

    let bus: Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>> =
        Arc::new(InMemoryEventBus::new());
    let events = bus.subscribe();
    let ledger = OrderLedger::new(store, bus, config);

    for (product_id, quantity) in [(demo.kettle, 1), (demo.mugs, 2)] {
        ledger.add_to_cart(AddToCart {
            user_id: demo.user,
            product_id,
            quantity,
            occurred_at: Utc::now(),
        })?;
    }

    let order = ledger.checkout_cart(CheckoutCart {
        user_id: demo.user,
        coupon_code: Some("WELCOME10".to_string()),
        shipping_address_id: Some(demo.address),
        billing_address_id: Some(demo.address),
        notes: Some("Ring twice".to_string()),
        occurred_at: Utc::now(),
    })?;

    ledger.record_payment(RecordPayment {
        order_id: order.id(),
        payment_status: PaymentStatus::Paid,
        occurred_at: Utc::now(),
    })?;

    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        ledger.transition_order_status(TransitionOrderStatus {
            order_id: order.id(),
            new_status: status,
            payment_status: None,
            occurred_at: Utc::now(),
        })?;
    }

    let review = ledger.submit_review(SubmitReview {
        user_id: demo.user,
        product_id: demo.kettle,
        order_id: Some(order.id()),
        rating: 5,
        title: Some("Boils fast".to_string()),
        comment: Some("Whistles loudly, which is the point.".to_string()),
        occurred_at: Utc::now(),
    })?;
    anyhow::ensure!(review.is_verified_purchase, "review should be verified");

    for envelope in events.drain() {
        tracing::info!(
            event_type = envelope.event_type(),
            aggregate_id = %envelope.aggregate_id(),
            "published"
        );
    }

    let order = ledger.order(order.id())?;
    println!("{}", serde_json::to_string_pretty(&order)?);
    Ok(())
}
