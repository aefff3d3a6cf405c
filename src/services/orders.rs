use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    config::{AppConfig, HangerConfig, LoyaltyConfig},
    db::DbPool,
    entities::customer::Entity as CustomerEntity,
    entities::loyalty_movement::{self, Entity as MovementEntity, MovementKind},
    entities::operator::Entity as OperatorEntity,
    entities::order::{self, Entity as OrderEntity, OrderStatus, PaymentStatus},
    entities::order_line::{self, Entity as OrderLineEntity},
    entities::payment::{self, Entity as PaymentEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::emit_events,
    services::loyalty::apply_fidelity_discount_in,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: Uuid,
    /// Acting operator; the order is anchored to the operator's shop.
    pub operator_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<order::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Recomputes `line_total` from the order's lines, then reruns the payment
/// reconciliation. Every line write funnels through here in the same
/// transaction, so the order total is never stale.
pub(crate) async fn refresh_total_in<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    loyalty: &LoyaltyConfig,
    order_id: Uuid,
) -> Result<(order::Model, Vec<Event>), ServiceError> {
    let ord = OrderEntity::find_by_id(order_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    let lines = OrderLineEntity::find()
        .filter(order_line::Column::OrderId.eq(order_id))
        .all(db)
        .await?;
    let line_total: Decimal = lines.iter().map(|l| l.line_price).sum();

    let active = order::ActiveModel {
        id: Set(ord.id),
        line_total: Set(line_total),
        version: Set(ord.version + 1),
        ..Default::default()
    };
    active.update(db).await?;

    recalculate_in(db, loyalty, order_id).await
}

/// The derived-state engine: aggregates the payment ledger, caps the paid
/// amount at the discounted total, derives the payment status, and awards
/// loyalty points exactly once when the order first becomes fully paid.
///
/// A fidelity discount produced by the award step mutates `discount` but the
/// new `total_final` is deliberately not re-derived within this call; the
/// next recalculation cycle picks it up. Resolving the discount -> total ->
/// status feedback recursively here would loop unbounded.
pub(crate) async fn recalculate_in<C: ConnectionTrait + TransactionTrait>(
    db: &C,
    loyalty: &LoyaltyConfig,
    order_id: Uuid,
) -> Result<(order::Model, Vec<Event>), ServiceError> {
    // Exclusive row lock: concurrent reconciliations of the same order queue
    // here and each validates against the previous one's committed state.
    // SQLite has no row locks; its writer lock serializes the same way.
    let ord = OrderEntity::find_by_id(order_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    let payments = PaymentEntity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .all(db)
        .await?;

    let payment_sum: Decimal = payments.iter().map(|p| p.amount).sum();
    let total_final = ord.total_final();

    // Never allow the paid amount to exceed the total, even if ledger entries
    // sum higher; true overpayment is rejected at admission time.
    let amount_paid = payment_sum.min(total_final);
    let latest_paid_at = payments.iter().map(|p| p.paid_at).max();

    let (payment_status, paid, paid_at) = if amount_paid <= Decimal::ZERO {
        (PaymentStatus::Unpaid, false, None)
    } else if amount_paid < total_final {
        (PaymentStatus::Partial, false, latest_paid_at)
    } else {
        (
            PaymentStatus::Paid,
            true,
            Some(latest_paid_at.unwrap_or_else(Utc::now)),
        )
    };

    let previous_status = ord.payment_status;

    let active = order::ActiveModel {
        id: Set(ord.id),
        amount_paid: Set(amount_paid),
        payment_status: Set(payment_status),
        paid: Set(paid),
        paid_at: Set(paid_at),
        version: Set(ord.version + 1),
        ..Default::default()
    };
    let mut updated = active.update(db).await?;

    let mut events = Vec::new();
    if paid && previous_status != PaymentStatus::Paid {
        events.push(Event::OrderPaid {
            order_id: updated.id,
            paid_at: updated.paid_at.unwrap_or_else(Utc::now),
        });
    }

    if payment_status == PaymentStatus::Paid {
        // The award runs in a savepoint so it lands whole or not at all: a
        // failure after the customer row was touched must not leave credited
        // points without the guarding earn movement. The payment state
        // persisted above survives either way.
        let award_txn = db.begin().await?;
        match award_points_in(&award_txn, loyalty, &updated).await {
            Ok((refreshed, mut award_events)) => {
                award_txn.commit().await?;
                updated = refreshed;
                events.append(&mut award_events);
            }
            Err(err) => {
                if let Err(rollback_err) = award_txn.rollback().await {
                    error!(
                        order_id = %updated.id,
                        error = %rollback_err,
                        "loyalty award rollback failed"
                    );
                }
                error!(
                    order_id = %updated.id,
                    customer_id = %updated.customer_id,
                    error = %err,
                    "loyalty award failed; payment state kept"
                );
                events.push(Event::LoyaltyAwardFailed {
                    order_id: updated.id,
                    customer_id: updated.customer_id,
                    reason: err.to_string(),
                });
            }
        }
    }

    Ok((updated, events))
}

/// Awards points for a fully paid order, at most once per order. The guard is
/// the ledger itself: an existing `earn` movement for the order means the
/// award already happened, no matter which write path triggered this
/// recalculation.
async fn award_points_in<C: ConnectionTrait>(
    db: &C,
    loyalty: &LoyaltyConfig,
    ord: &order::Model,
) -> Result<(order::Model, Vec<Event>), ServiceError> {
    let already_awarded = MovementEntity::find()
        .filter(loyalty_movement::Column::OrderId.eq(ord.id))
        .filter(loyalty_movement::Column::Kind.eq(MovementKind::Earn))
        .one(db)
        .await?
        .is_some();
    if already_awarded {
        return Ok((ord.clone(), Vec::new()));
    }

    let real_payment = ord.amount_paid.min(ord.total_final());
    if real_payment <= Decimal::ZERO {
        return Ok((ord.clone(), Vec::new()));
    }

    let points_earned = (real_payment * Decimal::from(loyalty.points_earn_rate))
        .floor()
        .to_i64()
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "point amount out of range for payment {real_payment}"
            ))
        })?;

    let mut cust = CustomerEntity::find_by_id(ord.customer_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Customer {} not found", ord.customer_id))
        })?;

    // Newly earned points count toward the milestone check below.
    cust.points_balance += points_earned;

    let (cust, discount) =
        apply_fidelity_discount_in(db, loyalty, cust, real_payment, Some(ord.id)).await?;

    let mut events = vec![Event::PointsEarned {
        customer_id: cust.id,
        order_id: ord.id,
        points: points_earned,
    }];

    let mut updated = ord.clone();
    if discount > Decimal::ZERO {
        // One-step lag: the discount lands on the order now but totals and
        // payment status are re-derived only on the next recalculation.
        let active = order::ActiveModel {
            id: Set(ord.id),
            discount: Set(ord.discount + discount),
            version: Set(ord.version + 1),
            ..Default::default()
        };
        updated = active.update(db).await?;
        events.push(Event::FidelityDiscountGranted {
            customer_id: cust.id,
            order_id: ord.id,
            discount,
        });
    }

    let movement = loyalty_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(cust.id),
        order_id: Set(Some(ord.id)),
        kind: Set(MovementKind::Earn),
        points: Set(points_earned),
        created_at: Set(Utc::now()),
        operator_id: Set(ord.operator_id),
    };
    movement.insert(db).await?;

    info!(
        order_id = %ord.id,
        customer_id = %cust.id,
        points_earned,
        %discount,
        "loyalty points awarded"
    );

    Ok((updated, events))
}

/// Service owning orders: intake, the fulfillment pipeline, and the
/// payment/loyalty reconciliation engine.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    loyalty: LoyaltyConfig,
    hangers: HangerConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, config: &AppConfig, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            loyalty: config.loyalty.clone(),
            hangers: config.hangers.clone(),
            event_sender,
        }
    }

    /// Creates a pending order anchored to the acting operator's shop. An
    /// operator without a shop association cannot take orders.
    #[instrument(skip(self, request), fields(customer_id = %request.customer_id, operator_id = %request.operator_id))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<order::Model, ServiceError> {
        let operator = OperatorEntity::find_by_id(request.operator_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Operator {} not found", request.operator_id))
            })?;
        let shop_id = operator
            .shop_id
            .ok_or(ServiceError::NotAssociated(operator.id))?;

        CustomerEntity::find_by_id(request.customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Customer {} not found", request.customer_id))
            })?;

        let now = Utc::now();
        let active = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(request.customer_id),
            shop_id: Set(shop_id),
            operator_id: Set(Some(operator.id)),
            status: Set(OrderStatus::Pending),
            line_total: Set(Decimal::ZERO),
            discount: Set(Decimal::ZERO),
            hangers_brought: Set(0),
            hanger_discount: Set(Decimal::ZERO),
            hanger_discount_applied: Set(false),
            amount_paid: Set(Decimal::ZERO),
            payment_status: Set(PaymentStatus::Unpaid),
            paid: Set(false),
            paid_at: Set(None),
            created_at: Set(now),
            version: Set(1),
        };
        let model = active.insert(&*self.db).await?;

        info!(order_id = %model.id, "order created");
        emit_events(&self.event_sender, vec![Event::OrderCreated(model.id)]).await;
        Ok(model)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        let ord = OrderEntity::find_by_id(order_id).one(&*self.db).await?;
        Ok(ord)
    }

    /// Lists orders newest first with pagination.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.max(1) - 1).await?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Moves an order along the fulfillment pipeline. Transitions are
    /// strictly forward-only; anything else is rejected with the current
    /// state and the allowed next states.
    #[instrument(skip(self), fields(order_id = %order_id, %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let ord = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let old_status = ord.status;
        if !old_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition {
                from: old_status,
                allowed: old_status.allowed_next_states().to_vec(),
            });
        }

        let active = order::ActiveModel {
            id: Set(ord.id),
            status: Set(new_status),
            version: Set(ord.version + 1),
            ..Default::default()
        };
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, %old_status, %new_status, "order status updated");

        let mut events = vec![Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        }];
        if new_status == OrderStatus::Ready {
            events.push(Event::OrderReadyForPickup {
                order_id,
                customer_id: updated.customer_id,
            });
        }
        emit_events(&self.event_sender, events).await;

        Ok(updated)
    }

    /// Sets the manual discount on an order and re-derives totals.
    #[instrument(skip(self), fields(order_id = %order_id, %discount))]
    pub async fn set_discount(
        &self,
        order_id: Uuid,
        discount: Decimal,
    ) -> Result<order::Model, ServiceError> {
        if discount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let ord = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if discount > ord.line_total {
            return Err(ServiceError::ValidationError(format!(
                "discount {discount} cannot exceed the order total {}",
                ord.line_total
            )));
        }

        let active = order::ActiveModel {
            id: Set(ord.id),
            discount: Set(discount),
            version: Set(ord.version + 1),
            ..Default::default()
        };
        active.update(&txn).await?;

        let (updated, events) = recalculate_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;
        emit_events(&self.event_sender, events).await;
        Ok(updated)
    }

    /// Grants the hanger-return discount, at most once per order.
    #[instrument(skip(self), fields(order_id = %order_id, hangers_brought))]
    pub async fn apply_hanger_discount(
        &self,
        order_id: Uuid,
        hangers_brought: i32,
    ) -> Result<order::Model, ServiceError> {
        if hangers_brought < 0 {
            return Err(ServiceError::ValidationError(
                "hanger count cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let ord = OrderEntity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if ord.hanger_discount_applied {
            return Err(ServiceError::ValidationError(
                "hanger discount was already applied to this order".to_string(),
            ));
        }

        let batch_size = self.hangers.batch_size as i64;
        let batches = hangers_brought as i64 / batch_size;
        if batches == 0 {
            return Err(ServiceError::ValidationError(format!(
                "at least {batch_size} hangers are required for the discount (got {hangers_brought})"
            )));
        }

        let hanger_discount = Decimal::from(batches) * self.hangers.discount_per_batch;

        let active = order::ActiveModel {
            id: Set(ord.id),
            hangers_brought: Set(hangers_brought),
            hanger_discount: Set(hanger_discount),
            hanger_discount_applied: Set(true),
            version: Set(ord.version + 1),
            ..Default::default()
        };
        active.update(&txn).await?;

        let (updated, events) = recalculate_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        info!(order_id = %order_id, %hanger_discount, "hanger discount applied");
        emit_events(&self.event_sender, events).await;
        Ok(updated)
    }

    /// Re-derives the payment status and totals for an order. Idempotent when
    /// nothing changed underneath.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn recalculate_payments(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let (updated, events) = recalculate_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;
        emit_events(&self.event_sender, events).await;
        Ok(updated)
    }

    /// Recomputes the line total and everything derived from it.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refresh_total(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let (updated, events) = refresh_total_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;
        emit_events(&self.event_sender, events).await;
        Ok(updated)
    }

    /// Predicate for the external notification dispatcher: is this order
    /// sitting ready for pickup? The core never sends notifications itself.
    pub async fn ready_for_pickup(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let ord = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        Ok(ord.status == OrderStatus::Ready)
    }

    /// All orders of a shop currently ready for pickup, newest first.
    pub async fn list_ready_for_pickup(
        &self,
        shop_id: Uuid,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::ShopId.eq(shop_id))
            .filter(order::Column::Status.eq(OrderStatus::Ready))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(orders)
    }
}
