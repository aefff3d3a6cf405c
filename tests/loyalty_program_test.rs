use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use uuid::Uuid;

use lavanderia_api::{
    db,
    entities::{
        catalog_item, customer,
        loyalty_movement::{self, MovementKind},
        operator::{self, OperatorRole},
        shop,
    },
    services::{
        order_lines::UpsertLineRequest, orders::CreateOrderRequest,
        payments::RegisterPaymentRequest,
    },
    AppConfig, AppServices, DbPool,
};
use lavanderia_api::entities::payment::PaymentMethod;

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

async fn seed_shop_and_operator(db: &DbPool) -> operator::Model {
    let s = shop::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Power Washing Matola".to_string()),
        address: Set(None),
        phone: Set(format!("+2588{}", &Uuid::new_v4().simple().to_string()[..8])),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed shop");

    operator::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Carlos".to_string()),
        phone: Set(None),
        shop_id: Set(Some(s.id)),
        role: Set(OperatorRole::Manager),
    }
    .insert(db)
    .await
    .expect("seed operator")
}

async fn seed_customer(db: &DbPool, points_balance: i64, total_spent: Decimal) -> customer::Model {
    customer::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Sr. Machava".to_string()),
        phone: Set(None),
        address: Set(None),
        points_balance: Set(points_balance),
        total_spent_cumulative: Set(total_spent),
        last_discount_milestone: Set(0),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed customer")
}

async fn seed_item(db: &DbPool, price: Decimal) -> catalog_item::Model {
    catalog_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Fato completo".to_string()),
        base_price: Set(price),
        available: Set(true),
    }
    .insert(db)
    .await
    .expect("seed catalog item")
}

async fn paid_order(
    services: &AppServices,
    customer_id: Uuid,
    operator_id: Uuid,
    item_id: Uuid,
    amount: Decimal,
) -> Uuid {
    let ord = services
        .orders
        .create_order(CreateOrderRequest {
            customer_id,
            operator_id,
        })
        .await
        .expect("create order");
    services
        .order_lines
        .add_line(
            ord.id,
            UpsertLineRequest {
                catalog_item_id: Some(item_id),
                quantity: 1,
                description: None,
            },
        )
        .await
        .expect("add line");
    services
        .payments
        .register_payment(
            ord.id,
            RegisterPaymentRequest {
                amount,
                method: PaymentMethod::Cash,
                reference: None,
                operator_id: Some(operator_id),
            },
        )
        .await
        .expect("pay order");
    ord.id
}

/// Scenario: a customer sitting at 4900 cumulative with 60000 points pays a
/// 200 order. The milestone is crossed (5100 total), 50000 points are
/// consumed, and the 250 discount lands on the order.
#[tokio::test]
async fn crossing_a_milestone_redeems_points_and_discounts_the_order() {
    let (pool, services) = setup().await;
    let op = seed_shop_and_operator(&pool).await;
    let cust = seed_customer(&pool, 60_000, dec!(4900)).await;
    let item = seed_item(&pool, dec!(200)).await;

    let order_id = paid_order(&services, cust.id, op.id, item.id, dec!(200)).await;

    let ord = services.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(ord.discount, dec!(250));

    let cust = services
        .customers
        .get_customer(cust.id)
        .await
        .unwrap()
        .unwrap();
    // 60000 seeded + 2000 earned on the 200 payment - 50000 redeemed.
    assert_eq!(cust.points_balance, 12_000);
    assert_eq!(cust.total_spent_cumulative, dec!(5100));
    assert_eq!(cust.last_discount_milestone, 1);

    let history = services.loyalty.movement_history(cust.id).await.unwrap();
    let redeems: Vec<_> = history
        .iter()
        .filter(|m| m.kind == MovementKind::Redeem)
        .collect();
    assert_eq!(redeems.len(), 1);
    assert_eq!(redeems[0].points, -50_000);
    assert_eq!(redeems[0].order_id, Some(order_id));
}

/// Scenario: the milestone is crossed but the balance cannot cover it. No
/// discount, no redemption, and the milestone stays put so the reward remains
/// pending.
#[tokio::test]
async fn insufficient_points_leave_the_milestone_pending() {
    let (pool, services) = setup().await;
    let op = seed_shop_and_operator(&pool).await;
    let cust = seed_customer(&pool, 10_000, dec!(4900)).await;
    let item = seed_item(&pool, dec!(200)).await;

    let order_id = paid_order(&services, cust.id, op.id, item.id, dec!(200)).await;

    let ord = services.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(ord.discount, Decimal::ZERO);

    let cust = services
        .customers
        .get_customer(cust.id)
        .await
        .unwrap()
        .unwrap();
    // Only the earn moved the balance; nothing was redeemed.
    assert_eq!(cust.points_balance, 12_000);
    assert_eq!(cust.total_spent_cumulative, dec!(5100));
    assert_eq!(cust.last_discount_milestone, 0);

    let history = services.loyalty.movement_history(cust.id).await.unwrap();
    assert!(history.iter().all(|m| m.kind != MovementKind::Redeem));
}

/// A pending milestone is granted on a later payment once the balance covers
/// it, without re-counting the spend that first crossed it.
#[tokio::test]
async fn pending_milestone_is_granted_once_points_accrue() {
    let (pool, services) = setup().await;
    let op = seed_shop_and_operator(&pool).await;
    let cust = seed_customer(&pool, 10_000, dec!(4900)).await;
    let item = seed_item(&pool, dec!(200)).await;
    let big_item = seed_item(&pool, dec!(4000)).await;

    // Crosses milestone 1 but cannot afford it.
    paid_order(&services, cust.id, op.id, item.id, dec!(200)).await;

    // 4000 more: cumulative 9100, still milestone 1; earns 40000 points,
    // balance 52000, enough to grant the pending milestone.
    let second = paid_order(&services, cust.id, op.id, big_item.id, dec!(4000)).await;

    let ord = services.orders.get_order(second).await.unwrap().unwrap();
    assert_eq!(ord.discount, dec!(250));

    let cust = services
        .customers
        .get_customer(cust.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cust.last_discount_milestone, 1);
    assert_eq!(cust.points_balance, 2_000);
    assert_eq!(cust.total_spent_cumulative, dec!(9100));
}

#[tokio::test]
async fn manual_adjust_floors_the_balance_and_ledgers_the_applied_delta() {
    let (pool, services) = setup().await;
    let cust = seed_customer(&pool, 500, Decimal::ZERO).await;

    let updated = services
        .loyalty
        .manual_adjust(cust.id, -2_000, None)
        .await
        .unwrap();
    assert_eq!(updated.points_balance, 0);

    // The ledger carries what actually moved, not the requested overdraw,
    // so the balance still equals the ledger sum.
    let history = services.loyalty.movement_history(cust.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, MovementKind::Adjust);
    assert_eq!(history[0].points, -500);
    assert_eq!(
        updated.points_balance,
        500 + history.iter().map(|m| m.points).sum::<i64>()
    );
}

#[tokio::test]
async fn expiry_is_idempotent_and_ledger_driven() {
    let (pool, services) = setup().await;
    let cust = seed_customer(&pool, 3_000, Decimal::ZERO).await;

    // An earn well past the validity window, backdated directly in the ledger.
    loyalty_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(cust.id),
        order_id: Set(None),
        kind: Set(MovementKind::Earn),
        points: Set(3_000),
        created_at: Set(Utc::now() - Duration::days(120)),
        operator_id: Set(None),
    }
    .insert(&*pool)
    .await
    .unwrap();

    let expired = services.loyalty.expire_stale_points(cust.id).await.unwrap();
    assert_eq!(expired, 3_000);

    let again = services.loyalty.expire_stale_points(cust.id).await.unwrap();
    assert_eq!(again, 0);

    let cust = services
        .customers
        .get_customer(cust.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cust.points_balance, 0);

    let history = services.loyalty.movement_history(cust.id).await.unwrap();
    let expiries: Vec<_> = history
        .iter()
        .filter(|m| m.kind == MovementKind::Expire)
        .collect();
    assert_eq!(expiries.len(), 1);
    assert_eq!(expiries[0].points, -3_000);
}

#[tokio::test]
async fn valid_points_windows_earns_but_not_deductions() {
    let (pool, services) = setup().await;
    let cust = seed_customer(&pool, 0, Decimal::ZERO).await;

    let now = Utc::now();
    let seed = |kind: MovementKind, points: i64, age_days: i64| loyalty_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        customer_id: Set(cust.id),
        order_id: Set(None),
        kind: Set(kind),
        points: Set(points),
        created_at: Set(now - Duration::days(age_days)),
        operator_id: Set(None),
    };

    seed(MovementKind::Earn, 1_000, 120).insert(&*pool).await.unwrap();
    seed(MovementKind::Earn, 2_000, 10).insert(&*pool).await.unwrap();
    seed(MovementKind::Redeem, -500, 120).insert(&*pool).await.unwrap();

    // Only the recent earn counts; the old redemption still deducts.
    let valid = services.loyalty.valid_points(cust.id, now).await.unwrap();
    assert_eq!(valid, 1_500);
}

#[tokio::test]
async fn sign_conventions_are_enforced_on_the_ledger() {
    let (pool, services) = setup().await;
    let cust = seed_customer(&pool, 0, Decimal::ZERO).await;

    let err = services
        .loyalty
        .record(cust.id, MovementKind::Earn, -10, None, None)
        .await
        .expect_err("negative earn must fail");
    assert!(matches!(
        err,
        lavanderia_api::ServiceError::ValidationError(_)
    ));

    let err = services
        .loyalty
        .record(cust.id, MovementKind::Redeem, 10, None, None)
        .await
        .expect_err("positive redeem must fail");
    assert!(matches!(
        err,
        lavanderia_api::ServiceError::ValidationError(_)
    ));
}
