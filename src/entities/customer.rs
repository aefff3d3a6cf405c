use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A customer of the laundry. `points_balance` is a cached mirror of the
/// loyalty movement ledger; it is mutated only inside reconciliation
/// transactions, never directly by presentation code.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "customers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,

    /// Cached point balance, kept consistent with the movement ledger.
    pub points_balance: i64,

    /// Monotonic accumulator of everything this customer has paid; drives the
    /// fidelity-discount milestones.
    pub total_spent_cumulative: Decimal,

    /// Highest spend milestone already rewarded with a discount.
    pub last_discount_milestone: i64,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order::Entity")]
    Orders,
    #[sea_orm(has_many = "super::loyalty_movement::Entity")]
    LoyaltyMovements,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl Related<super::loyalty_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LoyaltyMovements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
