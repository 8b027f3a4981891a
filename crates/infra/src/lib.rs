//! Infrastructure layer: persistence, configuration and the order ledger engine.
//!
//! Domain crates stay pure; this crate composes them with a [`store::LedgerStore`]
//! and an event bus into [`ledger::OrderLedger`].

pub mod config;
pub mod ledger;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, LedgerConfig};
pub use ledger::OrderLedger;
pub use store::{InMemoryLedgerStore, InMemoryTx, LedgerStore, StoreError, StoreResult, StoreTx};
