//! Customer accounts: users, their profile, address book and payment methods.
//!
//! The ledger only reads these (ownership checks at checkout) and the store
//! enforces their deletion policy; account management itself happens
//! elsewhere.

pub mod address;
pub mod payment_method;
pub mod user;

pub use address::{Address, AddressKind};
pub use payment_method::{PaymentMethod, PaymentMethodKind};
pub use user::{Profile, User};
