//! Post-commit publication of ledger events.

use serde_json::Value as JsonValue;
use tracing::warn;

use branchstock_core::AggregateId;
use branchstock_events::{Event, EventBus, EventEnvelope};
use branchstock_inventory::MovementRecorded;

use crate::store::CommitReceipt;

/// Aggregate type of movement envelopes.
pub const MOVEMENT_AGGREGATE: &str = "stock.movement";

/// Object-safe view of an [`EventBus`] carrying JSON envelopes.
pub trait EnvelopePublisher: Send + Sync {
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), String>;
}

impl<B> EnvelopePublisher for B
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>) -> Result<(), String> {
        self.publish(envelope).map_err(|e| format!("{e:?}"))
    }
}

/// Publish everything a commit wrote: movements first, then stream events.
///
/// Runs after the commit; a failure is logged and does not undo anything.
pub(crate) fn publish_receipt(publisher: &dyn EnvelopePublisher, receipt: &CommitReceipt) {
    for record in &receipt.movements {
        let event = MovementRecorded(record.clone());
        let payload = match serde_json::to_value(&event.0) {
            Ok(v) => v,
            Err(e) => {
                warn!(movement_id = %record.id, error = %e, "movement not published: serialization failed");
                continue;
            }
        };

        let envelope = EventEnvelope::new(
            record.id,
            AggregateId::from_uuid(record.id),
            MOVEMENT_AGGREGATE,
            record.sequence,
            event.event_type(),
            record.occurred_at,
            payload,
        );
        if let Err(e) = publisher.publish_envelope(envelope) {
            warn!(movement_id = %record.id, error = %e, "movement not published");
        }
    }

    for stored in &receipt.events {
        if let Err(e) = publisher.publish_envelope(stored.to_envelope()) {
            warn!(event_id = %stored.event_id, error = %e, "event not published");
        }
    }
}
