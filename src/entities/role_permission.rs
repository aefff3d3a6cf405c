use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::operator::OperatorRole;

/// Permission code granted to an operator role. Rows are seeded by the
/// idempotent provisioning step at process start.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "role_permissions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub role: OperatorRole,
    pub permission: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
