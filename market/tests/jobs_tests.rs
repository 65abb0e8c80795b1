mod support;

use chrono::{Datelike, Duration, Utc};
use market::jobs::{Initiator, Materializer, Watchdog};
use market::lifecycle::{PlaceOrder, PlaceScheduledOrder};
use market::model::{ItemRequest, ModelId, OrderMode, Permission};

async fn place_overdue_order(app: &support::TestApp, user: ModelId, address: ModelId, item: ModelId) -> ModelId {
    app.lifecycle
        .place_order(PlaceOrder {
            user_id: user,
            address_id: address,
            mode: OrderMode::Delivery,
            delivery_time: Some(Utc::now() - Duration::minutes(10)),
            items: vec![ItemRequest { item_id: item, quantity: 1 }],
        })
        .await
        .expect("order")
}

fn template_for_today(user: ModelId, address: ModelId, item: ModelId) -> PlaceScheduledOrder {
    let now = Utc::now();
    PlaceScheduledOrder {
        user_id: user,
        address_id: address,
        mode: OrderMode::Delivery,
        start_date: now.date_naive(),
        end_date: None,
        delivery_time: now.time(),
        weekdays: vec![now.weekday()],
        items: vec![ItemRequest { item_id: item, quantity: 2 }],
    }
}

#[tokio::test]
async fn watchdog_declines_overdue_unassigned_orders() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let overdue = place_overdue_order(&app, user, address, item).await;
    let fresh = app
        .place_delivery_order(user, address, vec![ItemRequest { item_id: item, quantity: 1 }])
        .await;

    let watchdog = Watchdog::new(app.lifecycle.clone(), 10);
    let declined = watchdog.run_once().await.expect("watchdog pass");

    assert_eq!(declined, 1);
    assert_eq!(app.order_status(overdue).await, "declined");
    assert_eq!(app.order_status(fresh).await, "processing");
}

#[tokio::test]
async fn watchdog_leaves_accepted_orders_alone() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    let order_id = place_overdue_order(&app, user, address, item).await;
    app.lifecycle.accept_order(staff, order_id).await.expect("accept");

    let watchdog = Watchdog::new(app.lifecycle.clone(), 10);
    let declined = watchdog.run_once().await.expect("watchdog pass");

    assert_eq!(declined, 0);
    assert_eq!(app.order_status(order_id).await, "accepted");
}

#[tokio::test]
async fn materializer_stamps_one_order_per_day() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let template_id = app
        .lifecycle
        .place_scheduled_order(template_for_today(user, address, item))
        .await
        .expect("template");

    let materializer = Materializer::new(app.lifecycle.clone(), 1);
    let today = Utc::now().date_naive();

    let first = materializer.run_for(today).await.expect("first pass");
    assert_eq!(first, 1);

    // A second pass the same day hits the occurrence guard and creates
    // nothing.
    let second = materializer.run_for(today).await.expect("second pass");
    assert_eq!(second, 0);
    assert_eq!(app.orders_for_template(template_id).await, 1);
}

#[tokio::test]
async fn materializer_skips_templates_due_another_weekday() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let mut template = template_for_today(user, address, item);
    template.weekdays = vec![Utc::now().weekday().succ()];
    app.lifecycle
        .place_scheduled_order(template)
        .await
        .expect("template");

    let materializer = Materializer::new(app.lifecycle.clone(), 1);
    let created = materializer
        .run_for(Utc::now().date_naive())
        .await
        .expect("pass");
    assert_eq!(created, 0);
}

#[tokio::test]
async fn materialized_orders_float_to_current_catalog_prices() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let template_id = app
        .lifecycle
        .place_scheduled_order(template_for_today(user, address, item))
        .await
        .expect("template");

    // The catalog price changes after the template was created.
    sqlx::query("UPDATE items SET price = 80.0 WHERE id = ?")
        .bind(item)
        .execute(&app.pool)
        .await
        .expect("price update");

    let materializer = Materializer::new(app.lifecycle.clone(), 1);
    materializer
        .run_for(Utc::now().date_naive())
        .await
        .expect("pass");

    let order_id: i64 =
        sqlx::query_scalar("SELECT id FROM orders WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(&app.pool)
            .await
            .expect("materialized order");
    assert_eq!(app.order_amount(order_id).await, 160.0);
}

#[tokio::test]
async fn initiator_activates_scheduled_orders_near_delivery() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let template_id = app
        .lifecycle
        .place_scheduled_order(template_for_today(user, address, item))
        .await
        .expect("template");

    let materializer = Materializer::new(app.lifecycle.clone(), 1);
    materializer
        .run_for(Utc::now().date_naive())
        .await
        .expect("materialize");

    let order_id: i64 =
        sqlx::query_scalar("SELECT id FROM orders WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(&app.pool)
            .await
            .expect("materialized order");
    assert_eq!(app.order_status(order_id).await, "scheduled");

    let initiator = Initiator::new(app.lifecycle.clone(), 5);
    let activated = initiator.run_once().await.expect("initiator pass");

    assert_eq!(activated, 1);
    assert_eq!(app.order_status(order_id).await, "processing");
}

#[tokio::test]
async fn materialized_orders_get_a_fresh_otp() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let template_id = app
        .lifecycle
        .place_scheduled_order(template_for_today(user, address, item))
        .await
        .expect("template");

    let materializer = Materializer::new(app.lifecycle.clone(), 1);
    materializer
        .run_for(Utc::now().date_naive())
        .await
        .expect("pass");

    let order_id: i64 =
        sqlx::query_scalar("SELECT id FROM orders WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(&app.pool)
            .await
            .expect("materialized order");
    let otp = app.otp_of(order_id).await.expect("otp row");
    assert!((1000..=9999).contains(&otp));
}
