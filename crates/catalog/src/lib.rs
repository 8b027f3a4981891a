//! Catalog domain module: categories, products and their images.
//!
//! Pure business rules (no IO). The interesting invariants live here:
//! the category tree never contains a cycle, and product stock is only ever
//! decremented through a check-and-decrement that refuses to go negative.

pub mod category;
pub mod image;
pub mod product;

pub use category::{Category, ensure_acyclic};
pub use image::ProductImage;
pub use product::Product;
