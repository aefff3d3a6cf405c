use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::operator::OperatorRole,
    entities::role_permission::{self, Entity as RolePermissionEntity},
    errors::ServiceError,
};

const MANAGER_PERMISSIONS: &[&str] = &[
    "view_operator",
    "manage_catalog",
    "manage_orders",
    "manage_customers",
    "manage_order_lines",
    "manage_payments",
];

const CASHIER_PERMISSIONS: &[&str] = &[
    "manage_orders",
    "manage_customers",
    "manage_order_lines",
];

/// Seeds the role permission table. Idempotent and intended to run once at
/// process start or deployment, never on entity writes.
#[instrument(skip(db))]
pub async fn ensure_role_permissions(db: &DbPool) -> Result<u64, ServiceError> {
    let mut inserted = 0u64;
    for (role, permissions) in [
        (OperatorRole::Manager, MANAGER_PERMISSIONS),
        (OperatorRole::Cashier, CASHIER_PERMISSIONS),
    ] {
        for permission in permissions {
            let exists = RolePermissionEntity::find()
                .filter(role_permission::Column::Role.eq(role))
                .filter(role_permission::Column::Permission.eq(*permission))
                .one(db)
                .await?
                .is_some();
            if exists {
                continue;
            }
            let active = role_permission::ActiveModel {
                id: Set(Uuid::new_v4()),
                role: Set(role),
                permission: Set(permission.to_string()),
            };
            active.insert(db).await?;
            inserted += 1;
        }
    }

    info!(inserted, "role permissions provisioned");
    Ok(inserted)
}

/// Permission codes granted to a role.
pub async fn permissions_for(db: &DbPool, role: OperatorRole) -> Result<Vec<String>, ServiceError> {
    let rows = RolePermissionEntity::find()
        .filter(role_permission::Column::Role.eq(role))
        .all(db)
        .await?;
    Ok(rows.into_iter().map(|r| r.permission).collect())
}
