use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use lavanderia_api::{
    db,
    entities::{
        catalog_item, customer,
        loyalty_movement::{self, Entity as MovementEntity, MovementKind},
        operator::{self, OperatorRole},
        payment::PaymentMethod,
        shop,
    },
    errors::ServiceError,
    services::{
        order_lines::UpsertLineRequest, orders::CreateOrderRequest,
        payments::RegisterPaymentRequest,
    },
    AppConfig, AppServices, DbPool,
};

async fn setup() -> (Arc<DbPool>, AppServices) {
    let pool = Arc::new(
        db::connect("sqlite::memory:")
            .await
            .expect("failed to create test database"),
    );
    db::run_migrations(&pool).await.expect("migrations failed");

    let cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
    let services = AppServices::new(pool.clone(), &cfg, None);
    (pool, services)
}

async fn seed_order_with_total(
    pool: &DbPool,
    services: &AppServices,
    total: Decimal,
) -> (Uuid, Uuid) {
    let s = shop::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Power Washing Sommerschield".to_string()),
        address: Set(None),
        phone: Set(format!("+2588{}", &Uuid::new_v4().simple().to_string()[..8])),
        created_at: Set(Utc::now()),
    }
    .insert(pool)
    .await
    .expect("seed shop");

    let op = operator::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Ivo".to_string()),
        phone: Set(None),
        shop_id: Set(Some(s.id)),
        role: Set(OperatorRole::Cashier),
    }
    .insert(pool)
    .await
    .expect("seed operator");

    let cust = customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Sr. Matsinhe".to_string()),
        phone: Set(None),
        address: Set(None),
        points_balance: Set(0),
        total_spent_cumulative: Set(Decimal::ZERO),
        last_discount_milestone: Set(0),
        created_at: Set(Utc::now()),
    }
    .insert(pool)
    .await
    .expect("seed customer");

    let item = catalog_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Tapete".to_string()),
        base_price: Set(total),
        available: Set(true),
    }
    .insert(pool)
    .await
    .expect("seed catalog item");

    let ord = services
        .orders
        .create_order(CreateOrderRequest {
            customer_id: cust.id,
            operator_id: op.id,
        })
        .await
        .expect("create order");
    services
        .order_lines
        .add_line(
            ord.id,
            UpsertLineRequest {
                catalog_item_id: Some(item.id),
                quantity: 1,
                description: None,
            },
        )
        .await
        .expect("add line");

    (ord.id, cust.id)
}

/// Two racing payments that together exceed the balance: only one may be
/// admitted. The loser either sees the winner's committed state and gets the
/// balance rejection, or loses a lock and gets the retryable conflict.
#[tokio::test]
async fn racing_payments_cannot_overdraw_the_balance() {
    let (pool, services) = setup().await;
    let (order_id, _) = seed_order_with_total(&pool, &services, dec!(250)).await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let svc = services.clone();
        handles.push(tokio::spawn(async move {
            svc.payments
                .register_payment(
                    order_id,
                    RegisterPaymentRequest {
                        amount: dec!(200),
                        method: PaymentMethod::Cash,
                        reference: None,
                        operator_id: None,
                    },
                )
                .await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => admitted += 1,
            Err(
                ServiceError::ExceedsBalance { .. } | ServiceError::ConcurrencyConflict(_),
            ) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(admitted, 1);

    let ord = services.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(ord.amount_paid, dec!(200));
    let payments = services.payments.list_payments(order_id).await.unwrap();
    assert_eq!(payments.len(), 1);
}

/// Concurrent recalculations of a freshly paid order must not double-award.
#[tokio::test]
async fn concurrent_recalculations_award_points_once() {
    let (pool, services) = setup().await;
    let (order_id, customer_id) = seed_order_with_total(&pool, &services, dec!(120)).await;

    services
        .payments
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: dec!(120),
                method: PaymentMethod::Mpesa,
                reference: None,
                operator_id: None,
            },
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let svc = services.clone();
        handles.push(tokio::spawn(async move {
            svc.orders.recalculate_payments(order_id).await
        }));
    }
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) | Err(ServiceError::ConcurrencyConflict(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let earns = MovementEntity::find()
        .filter(loyalty_movement::Column::OrderId.eq(order_id))
        .filter(loyalty_movement::Column::Kind.eq(MovementKind::Earn))
        .all(&*pool)
        .await
        .unwrap();
    assert_eq!(earns.len(), 1);

    let cust = customer::Entity::find_by_id(customer_id)
        .one(&*pool)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cust.points_balance, 1200);
}
