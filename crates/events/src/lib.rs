//! Ledger events and the bus that distributes them.
//!
//! Events are published **after** a ledger transaction commits. They describe
//! facts (an order was placed, stock was returned) for downstream consumers
//! such as notifications or search indexing; the persistence store stays the
//! source of truth.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
