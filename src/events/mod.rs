use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::stock_movement::{MovementType, StockItemType};

/// Domain events emitted after a transaction commits. Emission is
/// best-effort: a full channel or dropped receiver logs a warning and the
/// committed operation stands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    MovementRecorded {
        movement_id: Uuid,
        item_type: StockItemType,
        item_reference: Uuid,
        movement_type: MovementType,
        quantity: Decimal,
    },
    InventoryDeducted {
        processed_good_id: Uuid,
        quantity: Decimal,
        new_available: Decimal,
    },
    InventoryRestored {
        processed_good_id: Uuid,
        quantity: Decimal,
        new_available: Decimal,
    },

    // Order events
    OrderCreated(Uuid),
    OrderItemAdded {
        order_id: Uuid,
        order_item_id: Uuid,
        quantity: Decimal,
    },
    OrderItemAdjusted {
        order_id: Uuid,
        order_item_id: Uuid,
        old_quantity: Decimal,
        new_quantity: Decimal,
    },
    OrderItemDeleted {
        order_id: Uuid,
        order_item_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCompleted(Uuid),
    OrderCancelled(Uuid),
    PaymentRecorded {
        order_id: Uuid,
        amount: Decimal,
        amount_paid: Decimal,
    },

    // Lock events
    OrderLocked {
        order_id: Uuid,
        locked_at: DateTime<Utc>,
        can_unlock_until: DateTime<Utc>,
    },
    OrderUnlocked {
        order_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Post-commit emission helper: failures are logged, never surfaced.
    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Failed to emit domain event");
        }
    }
}

/// Drains the event channel. Downstream consumers (reporting, webhooks)
/// subscribe here; the default loop just traces.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        debug!(?event, "Processing domain event");
    }
    debug!("Event channel closed; processor exiting");
}

/// Convenience constructor for a connected sender/processor pair.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}
