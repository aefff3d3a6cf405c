use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    config::LoyaltyConfig,
    db::DbPool,
    entities::customer::{self, Entity as CustomerEntity},
    entities::loyalty_movement::{self, Entity as MovementEntity, MovementKind},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// A newly reached spend milestone and what granting it would cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilestoneOutcome {
    pub new_milestones: i64,
    pub points_required: i64,
}

impl MilestoneOutcome {
    pub fn discount(&self, config: &LoyaltyConfig) -> Decimal {
        Decimal::from(self.new_milestones) * config.discount_per_milestone
    }
}

/// Pure milestone arithmetic: given the cumulative spend after the current
/// payment and the highest milestone already rewarded, returns the milestones
/// newly crossed, or `None` when no new milestone was reached.
pub fn milestone_outcome(
    config: &LoyaltyConfig,
    total_spent_after: Decimal,
    last_discount_milestone: i64,
) -> Option<MilestoneOutcome> {
    let reached = (total_spent_after / config.milestone_spend_unit)
        .floor()
        .to_i64()?;
    if reached <= last_discount_milestone {
        return None;
    }
    let new_milestones = reached - last_discount_milestone;
    Some(MilestoneOutcome {
        new_milestones,
        points_required: new_milestones * config.points_per_milestone,
    })
}

/// Adds `amount_spent` to the customer's cumulative total and, when a new
/// spend milestone is crossed and enough points are available, consumes the
/// points and returns the granted discount. The milestone is only advanced
/// when the discount is actually granted, so an insufficient balance leaves
/// the discount pending until enough points accrue.
///
/// Persists the customer row (including any in-memory `points_balance`
/// change the caller staged) and the redeem movement in the same connection,
/// which the caller scopes to one transaction.
pub(crate) async fn apply_fidelity_discount_in<C: ConnectionTrait>(
    db: &C,
    config: &LoyaltyConfig,
    mut cust: customer::Model,
    amount_spent: Decimal,
    order_id: Option<Uuid>,
) -> Result<(customer::Model, Decimal), ServiceError> {
    cust.total_spent_cumulative += amount_spent;

    let mut discount = Decimal::ZERO;
    let mut redeemed_points = 0i64;

    if let Some(outcome) =
        milestone_outcome(config, cust.total_spent_cumulative, cust.last_discount_milestone)
    {
        if cust.points_balance >= outcome.points_required {
            discount = outcome.discount(config);
            redeemed_points = outcome.points_required;
            cust.points_balance -= outcome.points_required;
            cust.last_discount_milestone += outcome.new_milestones;
        }
    }

    let active = customer::ActiveModel {
        id: Set(cust.id),
        points_balance: Set(cust.points_balance),
        total_spent_cumulative: Set(cust.total_spent_cumulative),
        last_discount_milestone: Set(cust.last_discount_milestone),
        ..Default::default()
    };
    let updated = active.update(db).await?;

    if redeemed_points > 0 {
        let movement = loyalty_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(updated.id),
            order_id: Set(order_id),
            kind: Set(MovementKind::Redeem),
            points: Set(-redeemed_points),
            created_at: Set(Utc::now()),
            operator_id: Set(None),
        };
        movement.insert(db).await?;
        info!(
            customer_id = %updated.id,
            redeemed_points,
            %discount,
            "fidelity milestone reached, points redeemed"
        );
    }

    Ok((updated, discount))
}

/// Service owning the loyalty movement ledger and the customer point balance.
#[derive(Clone)]
pub struct LoyaltyService {
    db: Arc<DbPool>,
    config: LoyaltyConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl LoyaltyService {
    pub fn new(
        db: Arc<DbPool>,
        config: LoyaltyConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            config,
            event_sender,
        }
    }

    /// Appends an immutable movement to the ledger. Does not touch the cached
    /// `points_balance`; the reconciliation engine owns that.
    #[instrument(skip(self), fields(customer_id = %customer_id, ?kind, points))]
    pub async fn record(
        &self,
        customer_id: Uuid,
        kind: MovementKind,
        points: i64,
        order_id: Option<Uuid>,
        operator_id: Option<Uuid>,
    ) -> Result<loyalty_movement::Model, ServiceError> {
        match kind {
            MovementKind::Earn if points <= 0 => {
                return Err(ServiceError::ValidationError(
                    "earn movements must carry positive points".to_string(),
                ))
            }
            MovementKind::Redeem | MovementKind::Expire if points > 0 => {
                return Err(ServiceError::ValidationError(
                    "redeem/expire movements must carry non-positive points".to_string(),
                ))
            }
            _ => {}
        }

        let movement = loyalty_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            order_id: Set(order_id),
            kind: Set(kind),
            points: Set(points),
            created_at: Set(Utc::now()),
            operator_id: Set(operator_id),
        };
        let model = movement.insert(&*self.db).await?;
        Ok(model)
    }

    /// Manual point adjustment by an operator: appends an `Adjust` movement
    /// and moves the cached balance in the same transaction. The balance is
    /// floored at zero, and the ledger records the delta actually applied so
    /// a clamped overdraw keeps balance and ledger in agreement.
    #[instrument(skip(self), fields(customer_id = %customer_id, points))]
    pub async fn manual_adjust(
        &self,
        customer_id: Uuid,
        points: i64,
        operator_id: Option<Uuid>,
    ) -> Result<customer::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let cust = CustomerEntity::find_by_id(customer_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {customer_id} not found")))?;

        let new_balance = (cust.points_balance + points).max(0);
        let applied = new_balance - cust.points_balance;
        let active = customer::ActiveModel {
            id: Set(cust.id),
            points_balance: Set(new_balance),
            ..Default::default()
        };
        let updated = active.update(&txn).await?;

        let movement = loyalty_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            order_id: Set(None),
            kind: Set(MovementKind::Adjust),
            points: Set(applied),
            created_at: Set(Utc::now()),
            operator_id: Set(operator_id),
        };
        movement.insert(&txn).await?;

        txn.commit().await?;
        info!(customer_id = %customer_id, requested = points, applied, new_balance, "manual point adjustment");
        Ok(updated)
    }

    /// Reporting approximation of the spendable balance: points earned within
    /// the validity window plus all redemption/expiry movements, floored at
    /// zero. The cached `points_balance` on the customer row is the single
    /// source of truth; this windowed figure can diverge from it and is never
    /// reconciled against it.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn valid_points(
        &self,
        customer_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<i64, ServiceError> {
        let window_start = as_of - Duration::days(self.config.points_validity_days);

        let movements = MovementEntity::find()
            .filter(loyalty_movement::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await?;

        let earned_in_window: i64 = movements
            .iter()
            .filter(|m| m.kind == MovementKind::Earn && m.created_at >= window_start)
            .map(|m| m.points)
            .sum();

        // Deductions are cumulative, not windowed.
        let deductions: i64 = movements
            .iter()
            .filter(|m| matches!(m.kind, MovementKind::Redeem | MovementKind::Expire))
            .map(|m| m.points)
            .sum();

        Ok((earned_in_window + deductions).max(0))
    }

    /// Expires points earned before the validity window. Idempotent: the
    /// amount already expired is derived from the ledger itself, so running
    /// this twice in a row changes nothing. Returns the points expired by
    /// this call.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn expire_stale_points(&self, customer_id: Uuid) -> Result<i64, ServiceError> {
        let cutoff = Utc::now() - Duration::days(self.config.points_validity_days);

        let txn = self.db.begin().await?;

        let cust = CustomerEntity::find_by_id(customer_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {customer_id} not found")))?;

        let movements = MovementEntity::find()
            .filter(loyalty_movement::Column::CustomerId.eq(customer_id))
            .all(&txn)
            .await?;

        let stale_earned: i64 = movements
            .iter()
            .filter(|m| m.kind == MovementKind::Earn && m.created_at < cutoff)
            .map(|m| m.points)
            .sum();

        if stale_earned <= 0 {
            txn.commit().await?;
            return Ok(0);
        }

        let already_expired: i64 = movements
            .iter()
            .filter(|m| m.kind == MovementKind::Expire)
            .map(|m| m.points.abs())
            .sum();

        let to_expire = stale_earned - already_expired;
        if to_expire <= 0 {
            txn.commit().await?;
            return Ok(0);
        }

        let new_balance = (cust.points_balance - to_expire).max(0);
        let active = customer::ActiveModel {
            id: Set(cust.id),
            points_balance: Set(new_balance),
            ..Default::default()
        };
        active.update(&txn).await?;

        let movement = loyalty_movement::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            order_id: Set(None),
            kind: Set(MovementKind::Expire),
            points: Set(-to_expire),
            created_at: Set(Utc::now()),
            operator_id: Set(None),
        };
        movement.insert(&txn).await?;

        txn.commit().await?;

        info!(customer_id = %customer_id, expired = to_expire, new_balance, "stale points expired");

        if let Some(sender) = &self.event_sender {
            let _ = sender
                .send(Event::PointsExpired {
                    customer_id,
                    points: to_expire,
                })
                .await;
        }

        Ok(to_expire)
    }

    /// Full movement history for a customer, oldest first.
    pub async fn movement_history(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<loyalty_movement::Model>, ServiceError> {
        use sea_orm::QueryOrder;
        let movements = MovementEntity::find()
            .filter(loyalty_movement::Column::CustomerId.eq(customer_id))
            .order_by_asc(loyalty_movement::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(movements)
    }
}
