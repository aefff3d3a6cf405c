use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::customer::{self, Entity as CustomerEntity},
    entities::order::{self, Entity as OrderEntity},
    errors::ServiceError,
};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, message = "Customer name is required"))]
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CustomerListResponse {
    pub customers: Vec<customer::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// CRM reads and customer intake. Balance fields on the customer row are
/// owned by the reconciliation engine; this service never mutates them.
#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DbPool>,
}

impl CustomerService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request))]
    pub async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<customer::Model, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let active = customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name),
            phone: Set(request.phone),
            address: Set(request.address),
            points_balance: Set(0),
            total_spent_cumulative: Set(Decimal::ZERO),
            last_discount_milestone: Set(0),
            created_at: Set(Utc::now()),
        };
        let model = active.insert(&*self.db).await?;

        info!(customer_id = %model.id, "customer created");
        Ok(model)
    }

    pub async fn get_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<customer::Model>, ServiceError> {
        let cust = CustomerEntity::find_by_id(customer_id).one(&*self.db).await?;
        Ok(cust)
    }

    #[instrument(skip(self))]
    pub async fn list_customers(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<CustomerListResponse, ServiceError> {
        let paginator = CustomerEntity::find()
            .order_by_asc(customer::Column::Name)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let customers = paginator.fetch_page(page.max(1) - 1).await?;

        Ok(CustomerListResponse {
            customers,
            total,
            page,
            per_page,
        })
    }

    /// Sum of the balance due across a customer's not-fully-paid orders.
    /// Printed on receipts so the customer sees their total outstanding debt.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn outstanding_debt(&self, customer_id: Uuid) -> Result<Decimal, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Paid.eq(false))
            .all(&*self.db)
            .await?;
        Ok(orders.iter().map(|o| o.balance_due()).sum())
    }
}
