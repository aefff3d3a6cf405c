use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Fulfillment pipeline state. Strictly forward-only:
/// pending -> completed -> ready -> delivered. Independent of payment status.
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
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    #[strum(serialize = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    #[strum(serialize = "completed")]
    Completed,
    #[sea_orm(string_value = "ready")]
    #[strum(serialize = "ready")]
    Ready,
    #[sea_orm(string_value = "delivered")]
    #[strum(serialize = "delivered")]
    Delivered,
}

impl OrderStatus {
    /// Single source of truth for the transition table, consumed by both the
    /// validator and any presentation layer narrowing its choice list.
    pub fn allowed_next_states(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Completed],
            OrderStatus::Completed => &[OrderStatus::Ready],
            OrderStatus::Ready => &[OrderStatus::Delivered],
            // Terminal state
            OrderStatus::Delivered => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_next_states().contains(&target)
    }
}

/// Derived payment classification. Never set directly; always recomputed from
/// the payment ledger by the reconciliation engine.
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
pub enum PaymentStatus {
    #[sea_orm(string_value = "unpaid")]
    #[strum(serialize = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "partial")]
    #[strum(serialize = "partial")]
    Partial,
    #[sea_orm(string_value = "paid")]
    #[strum(serialize = "paid")]
    Paid,
}

/// A customer's service request. The order is the aggregation root for its
/// lines and payments; all derived fields on this row are owned by the
/// reconciliation engine.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub shop_id: Uuid,
    pub operator_id: Option<Uuid>,
    pub status: OrderStatus,

    /// Sum of the order lines' prices.
    pub line_total: Decimal,

    /// Accumulated manual + fidelity discount.
    pub discount: Decimal,

    /// Hangers the customer brought back with this order.
    pub hangers_brought: i32,

    /// Discount granted for returned hangers, applied at most once.
    pub hanger_discount: Decimal,
    pub hanger_discount_applied: bool,

    /// Sum of payments, capped at `total_final`.
    pub amount_paid: Decimal,

    pub payment_status: PaymentStatus,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub version: i32,
}

impl Model {
    /// Line total minus all discounts, floored at zero.
    pub fn total_final(&self) -> Decimal {
        crate::money::clamp_non_negative(self.line_total - self.discount - self.hanger_discount)
    }

    /// Outstanding balance due, floored at zero.
    pub fn balance_due(&self) -> Decimal {
        crate::money::clamp_non_negative(self.total_final() - self.amount_paid)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customer::Entity",
        from = "Column::CustomerId",
        to = "super::customer::Column::Id"
    )]
    Customer,
    #[sea_orm(
        belongs_to = "super::shop::Entity",
        from = "Column::ShopId",
        to = "super::shop::Column::Id"
    )]
    Shop,
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
    #[sea_orm(has_many = "super::loyalty_movement::Entity")]
    LoyaltyMovements,
}

impl Related<super::customer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl Related<super::shop::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shop.def()
    }
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_with(line_total: Decimal, discount: Decimal, amount_paid: Decimal) -> Model {
        Model {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            operator_id: None,
            status: OrderStatus::Pending,
            line_total,
            discount,
            hangers_brought: 0,
            hanger_discount: Decimal::ZERO,
            hanger_discount_applied: false,
            amount_paid,
            payment_status: PaymentStatus::Unpaid,
            paid: false,
            paid_at: None,
            created_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn total_final_floors_at_zero() {
        let order = order_with(dec!(100), dec!(150), Decimal::ZERO);
        assert_eq!(order.total_final(), Decimal::ZERO);
    }

    #[test]
    fn balance_due_subtracts_amount_paid() {
        let order = order_with(dec!(250), dec!(0), dec!(100));
        assert_eq!(order.balance_due(), dec!(150));
    }

    #[test]
    fn hanger_discount_reduces_total_final() {
        let mut order = order_with(dec!(500), dec!(50), Decimal::ZERO);
        order.hanger_discount = dec!(140);
        assert_eq!(order.total_final(), dec!(310));
    }

    #[test]
    fn transition_table_is_strictly_forward() {
        assert_eq!(
            OrderStatus::Pending.allowed_next_states(),
            &[OrderStatus::Completed]
        );
        assert_eq!(
            OrderStatus::Completed.allowed_next_states(),
            &[OrderStatus::Ready]
        );
        assert_eq!(
            OrderStatus::Ready.allowed_next_states(),
            &[OrderStatus::Delivered]
        );
        assert!(OrderStatus::Delivered.allowed_next_states().is_empty());
    }

    #[test]
    fn no_backwards_or_skipping_transitions() {
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Ready));
        assert!(!OrderStatus::Ready.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::Completed));
    }
}
