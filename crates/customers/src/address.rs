use serde::{Deserialize, Serialize};

use orderledger_core::{AddressId, LedgerError, LedgerResult, UserId};

/// What an address is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    Shipping,
    Billing,
    Both,
}

/// An entry in a user's address book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    pub user_id: UserId,
    pub kind: AddressKind,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code, upper case.
    pub country: String,
    pub is_default: bool,
}

impl Address {
    pub fn new(
        id: AddressId,
        user_id: UserId,
        kind: AddressKind,
        line1: impl Into<String>,
        city: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> LedgerResult<Self> {
        let line1 = line1.into();
        let city = city.into();
        let postal_code = postal_code.into();
        let country = country.into().trim().to_uppercase();

        if line1.trim().is_empty() || city.trim().is_empty() || postal_code.trim().is_empty() {
            return Err(LedgerError::validation(
                "address line, city and postal code are required",
            ));
        }
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::validation(format!(
                "country must be a two-letter code, got '{country}'"
            )));
        }

        Ok(Self {
            id,
            user_id,
            kind,
            line1,
            line2: None,
            city,
            state: None,
            postal_code,
            country,
            is_default: false,
        })
    }

    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    pub fn can_ship_to(&self) -> bool {
        matches!(self.kind, AddressKind::Shipping | AddressKind::Both)
    }

    pub fn can_bill_to(&self) -> bool {
        matches!(self.kind, AddressKind::Billing | AddressKind::Both)
    }
}
