use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    config::{AppConfig, LoyaltyConfig},
    db::DbPool,
    entities::order::Entity as OrderEntity,
    entities::payment::{self, Entity as PaymentEntity, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
    services::emit_events,
    services::orders::recalculate_in,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterPaymentRequest {
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub operator_id: Option<Uuid>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdatePaymentRequest {
    pub amount: Option<Decimal>,
    pub method: Option<PaymentMethod>,
    pub reference: Option<String>,
}

/// Service owning the payment ledger. Every write path (create, update,
/// delete) validates against the order's live balance and re-derives the
/// order's payment state before committing; nothing leaves totals stale.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    loyalty: LoyaltyConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentService {
    pub fn new(db: Arc<DbPool>, config: &AppConfig, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            loyalty: config.loyalty.clone(),
            event_sender,
        }
    }

    /// Registers a payment against an order's live balance and returns the
    /// refreshed order. The order row is re-read under an exclusive lock, so
    /// the second of two racing payments blocks and then validates against
    /// the first's committed state.
    #[instrument(skip(self, request), fields(order_id = %order_id, amount = %request.amount))]
    pub async fn register_payment(
        &self,
        order_id: Uuid,
        request: RegisterPaymentRequest,
    ) -> Result<crate::entities::order::Model, ServiceError> {
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount(request.amount));
        }

        let txn = self.db.begin().await?;

        let ord = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let balance = ord.balance_due();
        if request.amount > balance {
            return Err(ServiceError::ExceedsBalance {
                amount: request.amount,
                balance,
            });
        }

        let now = Utc::now();
        let active = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(request.amount),
            method: Set(request.method),
            reference: Set(request.reference),
            paid_at: Set(now),
            operator_id: Set(request.operator_id),
            created_at: Set(now),
        };
        let saved = active.insert(&txn).await?;

        let (updated, mut events) = recalculate_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        info!(
            order_id = %order_id,
            payment_id = %saved.id,
            amount = %saved.amount,
            method = %saved.method,
            "payment registered"
        );

        events.insert(
            0,
            Event::PaymentRegistered {
                order_id,
                payment_id: saved.id,
                amount: saved.amount,
            },
        );
        emit_events(&self.event_sender, events).await;

        Ok(updated)
    }

    /// Edits a payment. The balance check excludes the payment being edited,
    /// so raising an amount is allowed up to the rest of the balance due.
    #[instrument(skip(self, request), fields(payment_id = %payment_id))]
    pub async fn update_payment(
        &self,
        payment_id: Uuid,
        request: UpdatePaymentRequest,
    ) -> Result<payment::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let existing = PaymentEntity::find_by_id(payment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {payment_id} not found")))?;
        let order_id = existing.order_id;

        if let Some(new_amount) = request.amount {
            if new_amount <= Decimal::ZERO {
                return Err(ServiceError::InvalidAmount(new_amount));
            }
            let ord = OrderEntity::find_by_id(order_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
            // The edited payment's current amount is given back to the
            // balance before validating the replacement.
            let balance = ord.balance_due() + existing.amount;
            if new_amount > balance {
                return Err(ServiceError::ExceedsBalance {
                    amount: new_amount,
                    balance,
                });
            }
        }

        let mut active: payment::ActiveModel = existing.into();
        if let Some(amount) = request.amount {
            active.amount = Set(amount);
        }
        if let Some(method) = request.method {
            active.method = Set(method);
        }
        if let Some(reference) = request.reference {
            active.reference = Set(Some(reference));
        }
        let updated = active.update(&txn).await?;

        let (_, mut events) = recalculate_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        info!(order_id = %order_id, payment_id = %payment_id, "payment updated");
        events.insert(
            0,
            Event::PaymentUpdated {
                order_id,
                payment_id,
            },
        );
        emit_events(&self.event_sender, events).await;

        Ok(updated)
    }

    /// Deletes a payment and re-derives the order's payment state.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn delete_payment(&self, payment_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let existing = PaymentEntity::find_by_id(payment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {payment_id} not found")))?;
        let order_id = existing.order_id;

        existing.delete(&txn).await?;

        let (_, mut events) = recalculate_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        info!(order_id = %order_id, payment_id = %payment_id, "payment deleted");
        events.insert(
            0,
            Event::PaymentDeleted {
                order_id,
                payment_id,
            },
        );
        emit_events(&self.event_sender, events).await;

        Ok(())
    }

    /// Payment history for an order, newest first.
    pub async fn list_payments(&self, order_id: Uuid) -> Result<Vec<payment::Model>, ServiceError> {
        let payments = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::PaidAt)
            .all(&*self.db)
            .await?;
        Ok(payments)
    }
}
