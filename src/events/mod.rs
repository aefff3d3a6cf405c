use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the service layer after a mutation commits. External
/// collaborators (receipt renderer, SMS dispatcher, dashboards) subscribe
/// here; the core itself never sends notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    /// Emitted on transition into `ready`; the SMS dispatcher listens for this.
    OrderReadyForPickup {
        order_id: Uuid,
        customer_id: Uuid,
    },
    PaymentRegistered {
        order_id: Uuid,
        payment_id: Uuid,
        amount: Decimal,
    },
    PaymentUpdated {
        order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentDeleted {
        order_id: Uuid,
        payment_id: Uuid,
    },
    OrderPaid {
        order_id: Uuid,
        paid_at: DateTime<Utc>,
    },
    PointsEarned {
        customer_id: Uuid,
        order_id: Uuid,
        points: i64,
    },
    PointsExpired {
        customer_id: Uuid,
        points: i64,
    },
    FidelityDiscountGranted {
        customer_id: Uuid,
        order_id: Uuid,
        discount: Decimal,
    },
    /// A loyalty award failed after the payment state was already persisted.
    /// The payment is not rolled back; this event surfaces the failure.
    LoyaltyAwardFailed {
        order_id: Uuid,
        customer_id: Uuid,
        reason: String,
    },
    ReceiptIssued {
        order_id: Uuid,
        payment_id: Uuid,
        receipt_id: Uuid,
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
            .map_err(|e| format!("Failed to send event: {e}"))
    }
}

/// Creates an event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains events, logging each one. Useful as a default consumer when no
/// external dispatcher is wired up.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::LoyaltyAwardFailed {
                order_id, reason, ..
            } => {
                warn!(%order_id, reason, "loyalty award failed");
            }
            _ => info!(?event, "event received"),
        }
    }
}
