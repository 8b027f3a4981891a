use chrono::{DateTime, Utc};

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - attributed to the entity they describe (`aggregate_type` + `aggregate_id`)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "sales.order.placed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Kind of entity the event describes (e.g. "order", "product").
    fn aggregate_type(&self) -> &'static str;

    /// Identifier of the entity the event describes.
    fn aggregate_id(&self) -> uuid::Uuid;
}
