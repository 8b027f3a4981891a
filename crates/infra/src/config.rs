//! Engine configuration loaded from `ORDER_LEDGER_*` environment variables.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use thiserror::Error;

use orderledger_core::Money;
use orderledger_observability::LogFormat;
use orderledger_sales::{FlatRatePricing, NoCharges, PricingPolicy};

pub const ORDER_PREFIX: &str = "ORDER_LEDGER_ORDER_PREFIX";
pub const MAX_CONFLICT_RETRIES: &str = "ORDER_LEDGER_MAX_CONFLICT_RETRIES";
pub const MAX_LINE_QUANTITY: &str = "ORDER_LEDGER_MAX_LINE_QUANTITY";
pub const TAX_RATE: &str = "ORDER_LEDGER_TAX_RATE";
pub const FLAT_SHIPPING: &str = "ORDER_LEDGER_FLAT_SHIPPING";
pub const FREE_SHIPPING_OVER: &str = "ORDER_LEDGER_FREE_SHIPPING_OVER";
pub const LOG_FORMAT: &str = "ORDER_LEDGER_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Prefix of generated order numbers.
    pub order_prefix: String,
    /// How many times an operation is re-run after a conflict.
    pub max_conflict_retries: u32,
    /// Upper bound for a single (coalesced) order line.
    pub max_line_quantity: u32,
    /// Tax percentage applied to the discounted subtotal.
    pub tax_rate_percent: Decimal,
    pub flat_shipping: Money,
    pub free_shipping_over: Option<Money>,
    pub log_format: LogFormat,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            order_prefix: "ORD".to_string(),
            max_conflict_retries: 5,
            max_line_quantity: 1000,
            tax_rate_percent: Decimal::ZERO,
            flat_shipping: Money::ZERO,
            free_shipping_over: None,
            log_format: LogFormat::Json,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let order_prefix = get(ORDER_PREFIX).unwrap_or(defaults.order_prefix);
        if !order_prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::invalid(
                ORDER_PREFIX,
                &order_prefix,
                "prefix must be alphanumeric",
            ));
        }

        let tax_rate_percent: Decimal =
            parse(TAX_RATE, get(TAX_RATE))?.unwrap_or(defaults.tax_rate_percent);
        if tax_rate_percent.is_sign_negative() {
            return Err(ConfigError::invalid(
                TAX_RATE,
                &tax_rate_percent.to_string(),
                "tax rate cannot be negative",
            ));
        }

        let flat_shipping: Money =
            parse(FLAT_SHIPPING, get(FLAT_SHIPPING))?.unwrap_or(defaults.flat_shipping);
        let free_shipping_over: Option<Money> =
            parse(FREE_SHIPPING_OVER, get(FREE_SHIPPING_OVER))?;
        for (key, amount) in [
            (FLAT_SHIPPING, Some(flat_shipping)),
            (FREE_SHIPPING_OVER, free_shipping_over),
        ] {
            if let Some(amount) = amount.filter(Money::is_negative) {
                return Err(ConfigError::invalid(
                    key,
                    &amount.to_string(),
                    "amount cannot be negative",
                ));
            }
            if let Some(amount) = amount.filter(|a| !a.is_storable()) {
                return Err(ConfigError::invalid(
                    key,
                    &amount.to_string(),
                    format!("amount cannot exceed {}", Money::MAX),
                ));
            }
        }

        Ok(Self {
            order_prefix,
            max_conflict_retries: parse(MAX_CONFLICT_RETRIES, get(MAX_CONFLICT_RETRIES))?
                .unwrap_or(defaults.max_conflict_retries),
            max_line_quantity: parse(MAX_LINE_QUANTITY, get(MAX_LINE_QUANTITY))?
                .unwrap_or(defaults.max_line_quantity),
            tax_rate_percent,
            flat_shipping,
            free_shipping_over,
            log_format: parse(LOG_FORMAT, get(LOG_FORMAT))?.unwrap_or(defaults.log_format),
        })
    }

    /// The pricing collaborator described by this config: no charges unless
    /// a tax rate or a shipping fee is configured.
    pub fn pricing(&self) -> Arc<dyn PricingPolicy> {
        if self.tax_rate_percent.is_zero() && self.flat_shipping.is_zero() {
            Arc::new(NoCharges)
        } else {
            Arc::new(FlatRatePricing {
                tax_rate_percent: self.tax_rate_percent,
                flat_shipping: self.flat_shipping,
                free_shipping_over: self.free_shipping_over,
            })
        }
    }
}

fn parse<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.map(|value| value.parse().map_err(|e| ConfigError::invalid(key, &value, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn unset_variables_use_defaults() {
        assert_eq!(config(&[]).unwrap(), LedgerConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = config(&[
            (ORDER_PREFIX, "SHOP"),
            (MAX_CONFLICT_RETRIES, "9"),
            (MAX_LINE_QUANTITY, "50"),
            (TAX_RATE, "7.5"),
            (FLAT_SHIPPING, "4.99"),
            (FREE_SHIPPING_OVER, "75"),
            (LOG_FORMAT, "pretty"),
        ])
        .unwrap();

        assert_eq!(cfg.order_prefix, "SHOP");
        assert_eq!(cfg.max_conflict_retries, 9);
        assert_eq!(cfg.max_line_quantity, 50);
        assert_eq!(cfg.tax_rate_percent, Decimal::new(75, 1));
        assert_eq!(cfg.flat_shipping, Money::from_cents(499));
        assert_eq!(cfg.free_shipping_over, Some(Money::from_cents(7500)));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn pricing_follows_configured_charges() {
        use orderledger_sales::PricingQuote;

        let quote = PricingQuote {
            subtotal: Money::from_cents(2000),
            discount_amount: Money::ZERO,
            items: &[],
        };
        let none = config(&[]).unwrap().pricing().charges(&quote).unwrap();
        assert_eq!(none.shipping_cost, Money::ZERO);
        assert_eq!(none.tax_amount, Money::ZERO);

        let charged = config(&[(TAX_RATE, "10"), (FLAT_SHIPPING, "4.99")])
            .unwrap()
            .pricing()
            .charges(&quote)
            .unwrap();
        assert_eq!(charged.tax_amount, Money::from_cents(200));
        assert_eq!(charged.shipping_cost, Money::from_cents(499));
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = config(&[(MAX_LINE_QUANTITY, "lots")]).unwrap_err();
        assert!(err.to_string().starts_with(MAX_LINE_QUANTITY));

        assert!(config(&[(TAX_RATE, "-1")]).is_err());
        assert!(config(&[(FLAT_SHIPPING, "-0.50")]).is_err());
        assert!(config(&[(FLAT_SHIPPING, "100000000.00")]).is_err());
        assert!(config(&[(ORDER_PREFIX, "A-B")]).is_err());
        assert!(config(&[(LOG_FORMAT, "xml")]).is_err());
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        assert_eq!(config(&[(ORDER_PREFIX, "  ")]).unwrap().order_prefix, "ORD");
    }
}
