use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderledger_core::{LedgerError, LedgerResult, ProductId, UserId};

/// One product in a user's cart. At most one line exists per
/// `(user_id, product_id)`; adding the same product again grows the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub user_id: UserId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartLine {
    pub fn new(
        user_id: UserId,
        product_id: ProductId,
        quantity: i64,
        at: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let quantity = positive(product_id, quantity)?;
        Ok(Self {
            user_id,
            product_id,
            quantity,
            added_at: at,
            updated_at: at,
        })
    }

    /// Upsert semantics: add `quantity` units to the existing line.
    pub fn add(&mut self, quantity: i64, at: DateTime<Utc>) -> LedgerResult<()> {
        let extra = positive(self.product_id, quantity)?;
        self.quantity = self.quantity.checked_add(extra).ok_or(LedgerError::InvalidQuantity {
            product_id: self.product_id,
            quantity,
        })?;
        self.updated_at = at;
        Ok(())
    }

    pub fn set_quantity(&mut self, quantity: i64, at: DateTime<Utc>) -> LedgerResult<()> {
        self.quantity = positive(self.product_id, quantity)?;
        self.updated_at = at;
        Ok(())
    }
}

fn positive(product_id: ProductId, quantity: i64) -> LedgerResult<u32> {
    match u32::try_from(quantity) {
        Ok(q) if q > 0 => Ok(q),
        _ => Err(LedgerError::InvalidQuantity {
            product_id,
            quantity,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_grows_existing_line() {
        let mut line = CartLine::new(UserId::new(), ProductId::new(), 2, Utc::now()).unwrap();
        line.add(3, Utc::now()).unwrap();
        assert_eq!(line.quantity, 5);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        let product_id = ProductId::new();
        for q in [0, -1, i64::from(u32::MAX) + 1] {
            assert_eq!(
                CartLine::new(UserId::new(), product_id, q, Utc::now()),
                Err(LedgerError::InvalidQuantity {
                    product_id,
                    quantity: q
                })
            );
        }
    }

    #[test]
    fn set_quantity_replaces() {
        let mut line = CartLine::new(UserId::new(), ProductId::new(), 2, Utc::now()).unwrap();
        line.set_quantity(7, Utc::now()).unwrap();
        assert_eq!(line.quantity, 7);
        assert!(line.set_quantity(0, Utc::now()).is_err());
        assert_eq!(line.quantity, 7);
    }
}
