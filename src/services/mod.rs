// Order intake and reconciliation
pub mod order_lines;
pub mod orders;
pub mod payments;

// Loyalty program
pub mod loyalty;

// CRM and receipts
pub mod customers;
pub mod receipts;

// One-time startup provisioning
pub mod provisioning;

use std::sync::Arc;

use tracing::warn;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::{Event, EventSender},
};

/// Emits a batch of post-commit events, logging failures without surfacing
/// them to the caller; a slow consumer must not fail a committed write.
pub(crate) async fn emit_events(sender: &Option<Arc<EventSender>>, events: Vec<Event>) {
    if let Some(sender) = sender {
        for event in events {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "failed to send event");
            }
        }
    }
}

/// Bundles all services over one pool and configuration, for embedding
/// applications that want the whole back office wired at once.
#[derive(Clone)]
pub struct AppServices {
    pub orders: orders::OrderService,
    pub order_lines: order_lines::OrderLineService,
    pub payments: payments::PaymentService,
    pub loyalty: loyalty::LoyaltyService,
    pub customers: customers::CustomerService,
    pub receipts: receipts::ReceiptService,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, config: &AppConfig, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            orders: orders::OrderService::new(db.clone(), config, event_sender.clone()),
            order_lines: order_lines::OrderLineService::new(db.clone(), config, event_sender.clone()),
            payments: payments::PaymentService::new(db.clone(), config, event_sender.clone()),
            loyalty: loyalty::LoyaltyService::new(
                db.clone(),
                config.loyalty.clone(),
                event_sender.clone(),
            ),
            customers: customers::CustomerService::new(db.clone()),
            receipts: receipts::ReceiptService::new(db, event_sender),
        }
    }
}
