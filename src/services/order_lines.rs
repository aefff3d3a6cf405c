use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    config::LoyaltyConfig,
    db::DbPool,
    entities::catalog_item::Entity as CatalogItemEntity,
    entities::order::{self},
    entities::order_line::{self, Entity as OrderLineEntity},
    errors::ServiceError,
    events::EventSender,
    services::emit_events,
    services::orders::refresh_total_in,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct UpsertLineRequest {
    pub catalog_item_id: Option<Uuid>,
    pub quantity: i32,
    pub description: Option<String>,
}

/// Computes the line price from the catalog. A line with no catalog item or a
/// non-positive quantity is priced at zero (free-text lines are allowed).
async fn price_line<C: ConnectionTrait>(
    db: &C,
    catalog_item_id: Option<Uuid>,
    quantity: i32,
) -> Result<Decimal, ServiceError> {
    let Some(item_id) = catalog_item_id else {
        return Ok(Decimal::ZERO);
    };
    if quantity <= 0 {
        return Ok(Decimal::ZERO);
    }
    let item = CatalogItemEntity::find_by_id(item_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Catalog item {item_id} not found")))?;
    Ok(item.base_price * Decimal::from(quantity))
}

/// Service owning order lines. Every mutation recomputes the owning order's
/// totals in the same transaction; there is no deferred recompute window.
#[derive(Clone)]
pub struct OrderLineService {
    db: Arc<DbPool>,
    loyalty: LoyaltyConfig,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderLineService {
    pub fn new(db: Arc<DbPool>, config: &AppConfig, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db,
            loyalty: config.loyalty.clone(),
            event_sender,
        }
    }

    /// Adds a line to an order and refreshes the order's totals.
    #[instrument(skip(self, request), fields(order_id = %order_id))]
    pub async fn add_line(
        &self,
        order_id: Uuid,
        request: UpsertLineRequest,
    ) -> Result<order_line::Model, ServiceError> {
        if request.quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        order::Entity::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let line_price = price_line(&txn, request.catalog_item_id, request.quantity).await?;

        let active = order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            catalog_item_id: Set(request.catalog_item_id),
            quantity: Set(request.quantity),
            line_price: Set(line_price),
            description: Set(request.description),
        };
        let line = active.insert(&txn).await?;

        let (_, events) = refresh_total_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        info!(order_id = %order_id, line_id = %line.id, %line_price, "order line added");
        emit_events(&self.event_sender, events).await;
        Ok(line)
    }

    /// Updates a line (item, quantity, description) and refreshes the order.
    #[instrument(skip(self, request), fields(line_id = %line_id))]
    pub async fn update_line(
        &self,
        line_id: Uuid,
        request: UpsertLineRequest,
    ) -> Result<order_line::Model, ServiceError> {
        if request.quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity cannot be negative".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let line = OrderLineEntity::find_by_id(line_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order line {line_id} not found")))?;
        let order_id = line.order_id;

        let line_price = price_line(&txn, request.catalog_item_id, request.quantity).await?;

        let active = order_line::ActiveModel {
            id: Set(line.id),
            catalog_item_id: Set(request.catalog_item_id),
            quantity: Set(request.quantity),
            line_price: Set(line_price),
            description: Set(request.description),
            ..Default::default()
        };
        let updated = active.update(&txn).await?;

        let (_, events) = refresh_total_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        emit_events(&self.event_sender, events).await;
        Ok(updated)
    }

    /// Deletes a line and refreshes the owning order.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn delete_line(&self, line_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let line = OrderLineEntity::find_by_id(line_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order line {line_id} not found")))?;
        let order_id = line.order_id;

        line.delete(&txn).await?;

        let (_, events) = refresh_total_in(&txn, &self.loyalty, order_id).await?;
        txn.commit().await?;

        info!(order_id = %order_id, line_id = %line_id, "order line deleted");
        emit_events(&self.event_sender, events).await;
        Ok(())
    }

    /// All lines of an order.
    pub async fn list_lines(&self, order_id: Uuid) -> Result<Vec<order_line::Model>, ServiceError> {
        let lines = OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        Ok(lines)
    }
}
