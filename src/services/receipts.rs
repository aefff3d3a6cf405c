use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::payment::Entity as PaymentEntity,
    entities::receipt::{self, Entity as ReceiptEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::emit_events,
};

/// Receipts are issued per payment so partial payments each get their own
/// receipt. A receipt is a snapshot for the renderer; it never feeds back
/// into order or payment state.
#[derive(Clone)]
pub struct ReceiptService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ReceiptService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Issues the receipt for a payment. Idempotent: re-issuing returns the
    /// receipt already on record.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn issue_receipt(
        &self,
        payment_id: Uuid,
        operator_id: Option<Uuid>,
    ) -> Result<receipt::Model, ServiceError> {
        let txn = self.db.begin().await?;

        // Locks out a concurrent issue for the same payment; the unique index
        // on payment_id backstops it.
        let pay = PaymentEntity::find_by_id(payment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {payment_id} not found")))?;

        if let Some(existing) = ReceiptEntity::find()
            .filter(receipt::Column::PaymentId.eq(payment_id))
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            return Ok(existing);
        }

        let active = receipt::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(pay.order_id),
            payment_id: Set(pay.id),
            amount: Set(pay.amount),
            method: Set(pay.method),
            issued_at: Set(Utc::now()),
            operator_id: Set(operator_id),
        };
        let model = active.insert(&txn).await?;
        txn.commit().await?;

        info!(
            receipt_id = %model.id,
            payment_id = %payment_id,
            amount = %model.formatted_amount(),
            "receipt issued"
        );
        emit_events(
            &self.event_sender,
            vec![Event::ReceiptIssued {
                order_id: model.order_id,
                payment_id,
                receipt_id: model.id,
            }],
        )
        .await;

        Ok(model)
    }

    /// Receipt on record for a payment, if any.
    pub async fn get_receipt(
        &self,
        payment_id: Uuid,
    ) -> Result<Option<receipt::Model>, ServiceError> {
        let found = ReceiptEntity::find()
            .filter(receipt::Column::PaymentId.eq(payment_id))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// All receipts issued for an order.
    pub async fn list_receipts(&self, order_id: Uuid) -> Result<Vec<receipt::Model>, ServiceError> {
        let receipts = ReceiptEntity::find()
            .filter(receipt::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(receipts)
    }
}
