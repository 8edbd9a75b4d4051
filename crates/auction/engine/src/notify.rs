//! Event fan-out
//!
//! Every state change is appended to the hash-linked audit log and then
//! broadcast. Events are emitted after the change they describe has been
//! committed, so a failed append is logged and the committed outcome still
//! stands. Broadcast is fire-and-forget: a send with no subscribers is not
//! an error.

use auction_storage::{AuctionStorage, AuditAppend};
use auction_types::{Actor, AuctionEvent, AuctionEventEnvelope};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

#[derive(Clone)]
pub struct Notifier {
    storage: Arc<dyn AuctionStorage>,
    event_tx: broadcast::Sender<AuctionEventEnvelope>,
}

impl Notifier {
    pub fn new(storage: Arc<dyn AuctionStorage>, capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { storage, event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuctionEventEnvelope> {
        self.event_tx.subscribe()
    }

    pub async fn emit(&self, actor: &Actor, event: AuctionEvent, at: DateTime<Utc>) {
        let label = actor.label();
        match serde_json::to_value(&event) {
            Ok(payload) => {
                let append = AuditAppend {
                    timestamp: at,
                    actor: label.clone(),
                    stage: event.stage().to_string(),
                    round_id: event.round_id().cloned(),
                    message: format!("{} by {}", event.stage(), label),
                    payload,
                };
                if let Err(err) = self.storage.append_audit(append).await {
                    error!(stage = event.stage(), error = %err, "Failed to append audit record");
                }
            }
            Err(err) => {
                error!(stage = event.stage(), error = %err, "Failed to serialize audit payload");
            }
        }

        let envelope = AuctionEventEnvelope::new(event, at).with_actor(label);
        // Ignore send errors: no receivers is fine.
        let _ = self.event_tx.send(envelope);
    }
}
