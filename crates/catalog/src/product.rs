use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_core::{CategoryId, LedgerError, LedgerResult, Money, ProductId};

/// A sellable catalog item with its live stock counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    category_id: CategoryId,
    sku: String,
    name: String,
    description: Option<String>,
    price: Money,
    stock_quantity: u32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Product {
    /// Create an active product. The SKU is stored trimmed and upper-cased.
    pub fn new(
        id: ProductId,
        category_id: CategoryId,
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        stock_quantity: u32,
        created_at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let sku = sku.into().trim().to_uppercase();
        let name = name.into().trim().to_string();

        if sku.is_empty() {
            return Err(LedgerError::validation("sku cannot be empty"));
        }
        if name.is_empty() {
            return Err(LedgerError::validation("name cannot be empty"));
        }
        ensure_positive_price(price)?;

        Ok(Self {
            id,
            category_id,
            sku,
            name,
            description: None,
            price,
            stock_quantity,
            is_active: true,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn category_id(&self) -> CategoryId {
        self.category_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn price(&self) -> Money {
        self.price
    }

    pub fn stock_quantity(&self) -> u32 {
        self.stock_quantity
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Check if the product can be put in a cart or ordered.
    pub fn can_be_sold(&self) -> bool {
        self.is_active
    }

    /// Units that can be sold right now (zero for inactive products).
    pub fn available(&self) -> u32 {
        if self.is_active { self.stock_quantity } else { 0 }
    }

    /// Check-and-decrement: take `quantity` units out of stock.
    ///
    /// Fails without touching the counter when the product is inactive or
    /// holds fewer than `quantity` units. Callers run this inside the
    /// transaction that persists the decrement.
    pub fn reserve(&mut self, quantity: u32, at: DateTime<Utc>) -> LedgerResult<()> {
        if quantity == 0 {
            return Err(LedgerError::InvalidQuantity {
                product_id: self.id,
                quantity: 0,
            });
        }
        let available = self.available();
        if quantity > available {
            return Err(LedgerError::InsufficientStock {
                product_id: self.id,
                requested: quantity,
                available,
            });
        }
        self.stock_quantity = available - quantity;
        self.updated_at = at;
        Ok(())
    }

    /// Put `quantity` units back (cancellation or inbound stock).
    pub fn restock(&mut self, quantity: u32, at: DateTime<Utc>) -> LedgerResult<()> {
        self.stock_quantity = self.stock_quantity.checked_add(quantity).ok_or_else(|| {
            LedgerError::constraint(format!("stock overflow restocking product {}", self.id))
        })?;
        self.updated_at = at;
        Ok(())
    }

    pub fn reprice(&mut self, price: Money, at: DateTime<Utc>) -> LedgerResult<()> {
        ensure_positive_price(price)?;
        self.price = price;
        self.updated_at = at;
        Ok(())
    }

    pub fn rename(&mut self, name: impl Into<String>, at: DateTime<Utc>) -> LedgerResult<()> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("name cannot be empty"));
        }
        self.name = name;
        self.updated_at = at;
        Ok(())
    }

    pub fn describe(&mut self, description: Option<String>, at: DateTime<Utc>) {
        self.description = description;
        self.updated_at = at;
    }

    pub fn move_to(&mut self, category_id: CategoryId, at: DateTime<Utc>) {
        self.category_id = category_id;
        self.updated_at = at;
    }

    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.updated_at = at;
    }

    pub fn activate(&mut self, at: DateTime<Utc>) {
        self.is_active = true;
        self.updated_at = at;
    }
}

fn ensure_positive_price(price: Money) -> LedgerResult<()> {
    if price.is_zero() || price.is_negative() {
        return Err(LedgerError::validation("price must be positive"));
    }
    if !price.is_storable() {
        return Err(LedgerError::validation(format!(
            "price {price} exceeds the maximum of {}",
            Money::MAX
        )));
    }
    Ok(())
}
