use serde::{Deserialize, Serialize};

use orderledger_core::{LedgerError, LedgerResult, ProductId, ProductImageId};

/// An image attached to a product. Binary storage lives elsewhere; only the
/// URL is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductImage {
    pub id: ProductImageId,
    pub product_id: ProductId,
    pub url: String,
    pub alt_text: Option<String>,
    pub sort_order: u32,
    pub is_primary: bool,
}

impl ProductImage {
    pub fn new(
        id: ProductImageId,
        product_id: ProductId,
        url: impl Into<String>,
    ) -> LedgerResult<Self> {
        let url = url.into();
        if !(url.starts_with("https://") || url.starts_with("http://") || url.starts_with('/')) {
            return Err(LedgerError::validation(format!("unsupported image url '{url}'")));
        }
        Ok(Self {
            id,
            product_id,
            url,
            alt_text: None,
            sort_order: 0,
            is_primary: false,
        })
    }
}
