use serde::{Deserialize, Serialize};

use orderledger_core::{LedgerError, LedgerResult, PaymentMethodId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethodKind {
    CreditCard,
    DebitCard,
    Paypal,
    BankTransfer,
}

/// A tokenised payment instrument. Only the last four digits are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub user_id: UserId,
    pub kind: PaymentMethodKind,
    pub provider: String,
    pub last_four: Option<String>,
    pub is_default: bool,
}

impl PaymentMethod {
    pub fn new(
        id: PaymentMethodId,
        user_id: UserId,
        kind: PaymentMethodKind,
        provider: impl Into<String>,
        last_four: Option<String>,
    ) -> LedgerResult<Self> {
        if let Some(digits) = &last_four {
            if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(LedgerError::validation("last_four must be exactly four digits"));
            }
        }
        Ok(Self {
            id,
            user_id,
            kind,
            provider: provider.into(),
            last_four,
            is_default: false,
        })
    }
}
