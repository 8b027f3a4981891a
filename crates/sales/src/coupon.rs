use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use orderledger_core::{
    CouponId, CouponUsageId, LedgerError, LedgerResult, Money, OrderId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is a percentage of the subtotal.
    Percentage,
    /// `discount_value` is an amount of money.
    FixedAmount,
}

/// Coupon codes are compared case-insensitively; this is the stored form.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A discount rule with a validity window and an optional usage cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    id: CouponId,
    code: String,
    description: Option<String>,
    discount_type: DiscountType,
    discount_value: Decimal,
    minimum_order_amount: Money,
    maximum_discount_amount: Option<Money>,
    usage_limit: Option<u32>,
    used_count: u32,
    is_active: bool,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
}

impl Coupon {
    /// Create an active coupon valid in `[start_date, end_date)`.
    pub fn new(
        id: CouponId,
        code: &str,
        discount_type: DiscountType,
        discount_value: Decimal,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(LedgerError::validation("coupon code cannot be empty"));
        }
        if discount_value <= Decimal::ZERO {
            return Err(LedgerError::validation("discount_value must be positive"));
        }
        if discount_type == DiscountType::Percentage && discount_value > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation(
                "percentage discount cannot exceed 100",
            ));
        }
        if start_date >= end_date {
            return Err(LedgerError::validation("start_date must precede end_date"));
        }

        Ok(Self {
            id,
            code,
            description: None,
            discount_type,
            discount_value,
            minimum_order_amount: Money::ZERO,
            maximum_discount_amount: None,
            usage_limit: None,
            used_count: 0,
            is_active: true,
            start_date,
            end_date,
        })
    }

    pub fn with_minimum_order_amount(mut self, minimum: Money) -> Self {
        self.minimum_order_amount = minimum;
        self
    }

    pub fn with_maximum_discount(mut self, maximum: Money) -> Self {
        self.maximum_discount_amount = Some(maximum);
        self
    }

    pub fn with_usage_limit(mut self, limit: u32) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> CouponId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn discount_type(&self) -> DiscountType {
        self.discount_type
    }

    pub fn discount_value(&self) -> Decimal {
        self.discount_value
    }

    pub fn minimum_order_amount(&self) -> Money {
        self.minimum_order_amount
    }

    pub fn maximum_discount_amount(&self) -> Option<Money> {
        self.maximum_discount_amount
    }

    pub fn usage_limit(&self) -> Option<u32> {
        self.usage_limit
    }

    pub fn used_count(&self) -> u32 {
        self.used_count
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }

    pub fn is_within_window(&self, at: DateTime<Utc>) -> bool {
        self.start_date <= at && at < self.end_date
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.used_count >= limit)
    }

    /// Check every redemption precondition against `subtotal` at time `at`.
    pub fn check_redeemable(&self, subtotal: Money, at: DateTime<Utc>) -> LedgerResult<()> {
        if !self.is_active || !self.is_within_window(at) {
            return Err(LedgerError::CouponExpired {
                code: self.code.clone(),
            });
        }
        if let Some(limit) = self.usage_limit {
            if self.used_count >= limit {
                return Err(LedgerError::CouponUsageExceeded {
                    code: self.code.clone(),
                    limit,
                });
            }
        }
        if subtotal < self.minimum_order_amount {
            return Err(LedgerError::CouponMinimumNotMet {
                code: self.code.clone(),
                minimum: self.minimum_order_amount,
                subtotal,
            });
        }
        Ok(())
    }

    /// Discount this coupon grants on `subtotal`.
    ///
    /// Percentage coupons take `subtotal × value / 100`, fixed coupons
    /// `min(value, subtotal)`; either is clipped to `maximum_discount_amount`
    /// and never exceeds the subtotal.
    pub fn discount_for(&self, subtotal: Money) -> LedgerResult<Money> {
        let raw = match self.discount_type {
            DiscountType::Percentage => subtotal.percent(self.discount_value)?,
            DiscountType::FixedAmount => Money::new(self.discount_value).min(subtotal),
        };
        let capped = match self.maximum_discount_amount {
            Some(max) => raw.min(max),
            None => raw,
        };
        Ok(capped.min(subtotal))
    }

    /// Count one redemption. Fails when the cap is already reached.
    pub fn redeem(&mut self) -> LedgerResult<()> {
        if let Some(limit) = self.usage_limit {
            if self.used_count >= limit {
                return Err(LedgerError::CouponUsageExceeded {
                    code: self.code.clone(),
                    limit,
                });
            }
        }
        self.used_count += 1;
        Ok(())
    }
}

/// One redemption of a coupon, recorded against the order that used it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponUsage {
    pub id: CouponUsageId,
    pub coupon_id: CouponId,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub discount_amount: Money,
    pub used_at: DateTime<Utc>,
}
