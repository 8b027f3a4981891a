//! Tax and shipping: the pricing collaborator consulted at checkout.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use orderledger_core::{LedgerResult, Money};

use crate::order::OrderItem;

/// What the pricing collaborator sees when quoting an order.
#[derive(Debug, Clone, Copy)]
pub struct PricingQuote<'a> {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub items: &'a [OrderItem],
}

/// Tax and shipping for one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Charges {
    pub tax_amount: Money,
    pub shipping_cost: Money,
}

/// Supplies tax and shipping for an order being placed.
pub trait PricingPolicy: Send + Sync {
    fn charges(&self, quote: &PricingQuote<'_>) -> LedgerResult<Charges>;
}

/// No tax, no shipping. The default when no pricing collaborator is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCharges;

impl PricingPolicy for NoCharges {
    fn charges(&self, _quote: &PricingQuote<'_>) -> LedgerResult<Charges> {
        Ok(Charges::default())
    }
}

/// A tax percentage on the discounted subtotal plus a flat shipping fee,
/// waived once the subtotal reaches `free_shipping_over`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatRatePricing {
    pub tax_rate_percent: Decimal,
    pub flat_shipping: Money,
    pub free_shipping_over: Option<Money>,
}

impl PricingPolicy for FlatRatePricing {
    fn charges(&self, quote: &PricingQuote<'_>) -> LedgerResult<Charges> {
        let taxable = quote
            .subtotal
            .checked_sub(quote.discount_amount)
            .unwrap_or(Money::ZERO);
        let free_shipping = self
            .free_shipping_over
            .is_some_and(|threshold| quote.subtotal >= threshold);

        Ok(Charges {
            tax_amount: taxable.percent(self.tax_rate_percent)?,
            shipping_cost: if free_shipping {
                Money::ZERO
            } else {
                self.flat_shipping
            },
        })
    }
}

impl<P: PricingPolicy + ?Sized> PricingPolicy for std::sync::Arc<P> {
    fn charges(&self, quote: &PricingQuote<'_>) -> LedgerResult<Charges> {
        (**self).charges(quote)
    }
}
