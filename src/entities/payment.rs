use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Payment channels accepted at the counter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "cash")]
    #[strum(serialize = "cash")]
    Cash,
    #[sea_orm(string_value = "pos")]
    #[strum(serialize = "pos")]
    Pos,
    #[sea_orm(string_value = "mpesa")]
    #[strum(serialize = "mpesa")]
    Mpesa,
    #[sea_orm(string_value = "emola")]
    #[strum(serialize = "emola")]
    Emola,
    #[sea_orm(string_value = "mobile_account")]
    #[strum(serialize = "mobile_account")]
    MobileAccount,
    #[sea_orm(string_value = "bank_transfer")]
    #[strum(serialize = "bank_transfer")]
    BankTransfer,
    #[sea_orm(string_value = "other")]
    #[strum(serialize = "other")]
    Other,
}

/// A (possibly partial) payment against an order. Validated against the
/// order's live balance at write time; every create/update/delete triggers a
/// recalculation of the owning order.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub operator_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(has_one = "super::receipt::Entity")]
    Receipt,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::receipt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Receipt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
