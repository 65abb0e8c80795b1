mod support;

use market::error::MarketError;
use market::lifecycle::PlaceOrder;
use market::model::{ItemRequest, OrderMode, OrderStatus, Permission, MAX_FLAG_COUNT};

fn one_of(item_id: i64, quantity: i64) -> Vec<ItemRequest> {
    vec![ItemRequest { item_id, quantity }]
}

#[tokio::test]
async fn order_amount_comes_from_catalog_snapshot() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 2))
        .await;

    assert_eq!(app.order_amount(order_id).await, 100.0);
}

#[tokio::test]
async fn active_offer_discounts_the_snapshot() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    app.lifecycle
        .offers()
        .create("Monsoon sale", None, 10)
        .await
        .expect("offer");

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 2))
        .await;

    assert_eq!(app.order_amount(order_id).await, 90.0);
}

#[tokio::test]
async fn placement_fails_outside_service_area() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    // A degree of latitude is ~111 km, far beyond the service radius.
    let address = app
        .seed_address_at(user, support::LAT + 1.0, support::LONG)
        .await;
    let item = app.seed_item("Milk", 50.0).await;

    let result = app
        .lifecycle
        .place_order(PlaceOrder {
            user_id: user,
            address_id: address,
            mode: OrderMode::Delivery,
            delivery_time: None,
            items: one_of(item, 1),
        })
        .await;

    assert!(matches!(result, Err(MarketError::Precondition { .. })));
}

#[tokio::test]
async fn blocked_user_cannot_place_orders() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    app.lifecycle
        .users()
        .set_flags(user, MAX_FLAG_COUNT)
        .await
        .expect("flags");

    let result = app
        .lifecycle
        .place_order(PlaceOrder {
            user_id: user,
            address_id: address,
            mode: OrderMode::Delivery,
            delivery_time: None,
            items: one_of(item, 1),
        })
        .await;

    assert!(matches!(result, Err(MarketError::Precondition { .. })));

    app.lifecycle.unflag_user(user).await.expect("unflag");
    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    assert_eq!(app.order_status(order_id).await, "processing");
}

#[tokio::test]
async fn only_one_staff_member_wins_acceptance() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let first = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;
    let second = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;

    let (a, b) = tokio::join!(
        app.lifecycle.accept_order(first, order_id),
        app.lifecycle.accept_order(second, order_id),
    );

    assert_eq!(
        a.is_ok() as u8 + b.is_ok() as u8,
        1,
        "exactly one staff member should win: {a:?} / {b:?}"
    );
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(MarketError::Precondition { .. })));
    assert_eq!(app.order_status(order_id).await, "accepted");
}

#[tokio::test]
async fn acceptance_limit_caps_concurrent_assignments() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    for _ in 0..3 {
        let order_id = app
            .place_delivery_order(user, address, one_of(item, 1))
            .await;
        app.lifecycle
            .accept_order(staff, order_id)
            .await
            .expect("acceptance within limit");
    }

    let fourth = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    let result = app.lifecycle.accept_order(staff, fourth).await;

    assert!(matches!(result, Err(MarketError::Precondition { .. })));
    assert_eq!(app.order_status(fourth).await, "processing");
}

#[tokio::test]
async fn reassignment_bypasses_the_acceptance_limit() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    for _ in 0..3 {
        let order_id = app
            .place_delivery_order(user, address, one_of(item, 1))
            .await;
        app.lifecycle
            .accept_order(staff, order_id)
            .await
            .expect("acceptance within limit");
    }

    let fourth = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle
        .reassign_order(fourth, staff)
        .await
        .expect("manager reassignment");
    assert_eq!(app.order_status(fourth).await, "accepted");
}

#[tokio::test]
async fn one_delivery_in_flight_per_staff_member() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    let first = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    let second = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.accept_order(staff, first).await.expect("accept");
    app.lifecycle.accept_order(staff, second).await.expect("accept");

    app.lifecycle
        .start_delivery(staff, first)
        .await
        .expect("first delivery starts");
    let blocked = app.lifecycle.start_delivery(staff, second).await;
    assert!(matches!(blocked, Err(MarketError::Precondition { .. })));

    let otp = app.otp_of(first).await.expect("otp row");
    app.lifecycle
        .confirm_delivery(staff, first, otp, None)
        .await
        .expect("delivery confirmed");

    app.lifecycle
        .start_delivery(staff, second)
        .await
        .expect("second delivery starts after the first settles");
}

#[tokio::test]
async fn wrong_otp_changes_nothing_and_right_otp_burns_the_code() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.accept_order(staff, order_id).await.expect("accept");
    app.lifecycle
        .start_delivery(staff, order_id)
        .await
        .expect("start");

    let otp = app.otp_of(order_id).await.expect("otp row");
    let wrong = if otp == 9999 { 1000 } else { otp + 1 };

    let rejected = app.lifecycle.confirm_delivery(staff, order_id, wrong, None).await;
    assert!(matches!(rejected, Err(MarketError::Precondition { .. })));
    assert_eq!(app.order_status(order_id).await, "outForDelivery");
    assert!(app.otp_of(order_id).await.is_some());

    app.lifecycle
        .confirm_delivery(staff, order_id, otp, Some(4.5))
        .await
        .expect("confirm");
    assert_eq!(app.order_status(order_id).await, "delivered");
    assert!(app.otp_of(order_id).await.is_none());

    // Replaying the confirmation finds no code to check against.
    let replay = app.lifecycle.confirm_delivery(staff, order_id, otp, None).await;
    assert!(matches!(replay, Err(MarketError::NotFound)));
}

#[tokio::test]
async fn confirmation_requires_a_dispatched_order_and_its_courier() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;
    let other = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.accept_order(staff, order_id).await.expect("accept");
    let otp = app.otp_of(order_id).await.expect("otp row");

    // The right code alone is not enough before dispatch.
    let early = app.lifecycle.confirm_delivery(staff, order_id, otp, None).await;
    assert!(matches!(early, Err(MarketError::Precondition { .. })));
    assert_eq!(app.order_status(order_id).await, "accepted");
    assert!(app.otp_of(order_id).await.is_some());

    app.lifecycle
        .start_delivery(staff, order_id)
        .await
        .expect("start");

    // Nor is it enough in someone else's hands.
    let stolen = app.lifecycle.confirm_delivery(other, order_id, otp, None).await;
    assert!(matches!(stolen, Err(MarketError::Precondition { .. })));
    assert_eq!(app.order_status(order_id).await, "outForDelivery");

    app.lifecycle
        .confirm_delivery(staff, order_id, otp, None)
        .await
        .expect("confirm");
    assert_eq!(app.order_status(order_id).await, "delivered");
}

#[tokio::test]
async fn cancelling_a_processing_order_never_flags() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    for _ in 0..3 {
        let order_id = app
            .place_delivery_order(user, address, one_of(item, 1))
            .await;
        app.lifecycle
            .cancel_order(user, order_id)
            .await
            .expect("cancel");
    }

    assert_eq!(app.flags_of(user).await, 0);
}

#[tokio::test]
async fn consecutive_post_acceptance_cancellations_accrue_flags() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    // First post-acceptance cancel: no terminal history, so no flag yet.
    let first = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.accept_order(staff, first).await.expect("accept");
    app.lifecycle.cancel_order(user, first).await.expect("cancel");
    assert_eq!(app.flags_of(user).await, 0);

    // Second in a row: the previous settled order was a cancellation.
    let second = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.accept_order(staff, second).await.expect("accept");
    app.lifecycle.cancel_order(user, second).await.expect("cancel");
    assert_eq!(app.flags_of(user).await, 1);
}

#[tokio::test]
async fn unflagging_wipes_the_cancellation_history() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let staff = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;

    for _ in 0..2 {
        let order_id = app
            .place_delivery_order(user, address, one_of(item, 1))
            .await;
        app.lifecycle.accept_order(staff, order_id).await.expect("accept");
        app.lifecycle.cancel_order(user, order_id).await.expect("cancel");
    }
    assert_eq!(app.flags_of(user).await, 1);

    app.lifecycle.unflag_user(user).await.expect("unflag");

    // Orders settled before the pardon are out of scope: another
    // post-acceptance cancel starts a fresh streak instead of accruing.
    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.accept_order(staff, order_id).await.expect("accept");
    app.lifecycle.cancel_order(user, order_id).await.expect("cancel");
    assert_eq!(app.flags_of(user).await, 0);
}

#[tokio::test]
async fn terminal_orders_cannot_be_cancelled() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;
    app.lifecycle.cancel_order(user, order_id).await.expect("cancel");

    let again = app.lifecycle.cancel_order(user, order_id).await;
    assert!(matches!(again, Err(MarketError::Precondition { .. })));
}

#[tokio::test]
async fn rating_is_scoped_to_the_order_owner() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let stranger = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;

    let denied = app.lifecycle.rate_order(stranger, order_id, 5.0).await;
    assert!(matches!(denied, Err(MarketError::NotFound)));

    app.lifecycle
        .rate_order(user, order_id, 5.0)
        .await
        .expect("owner rates");
}

#[tokio::test]
async fn open_order_feed_is_radius_and_rejection_filtered() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;
    let item = app.seed_item("Milk", 50.0).await;
    let near = app
        .seed_staff(Permission::DeliveryBoy, support::LAT, support::LONG)
        .await;
    let far = app
        .seed_staff(Permission::DeliveryBoy, support::LAT + 1.0, support::LONG)
        .await;

    let order_id = app
        .place_delivery_order(user, address, one_of(item, 1))
        .await;

    let near_feed = app
        .lifecycle
        .new_orders_for_staff(near, OrderMode::Delivery)
        .await
        .expect("feed");
    assert_eq!(near_feed.len(), 1);
    assert_eq!(near_feed[0].order_id, order_id);

    let far_feed = app
        .lifecycle
        .new_orders_for_staff(far, OrderMode::Delivery)
        .await
        .expect("feed");
    assert!(far_feed.is_empty());

    app.lifecycle
        .orders()
        .reject(near, order_id)
        .await
        .expect("reject");
    let after_reject = app
        .lifecycle
        .new_orders_for_staff(near, OrderMode::Delivery)
        .await
        .expect("feed");
    assert!(after_reject.is_empty());
}

#[tokio::test]
async fn cart_orders_carry_no_items_and_no_amount() {
    let app = support::setup().await;
    app.seed_manager().await;
    let user = app.seed_user(Permission::User).await;
    let address = app.seed_address(user).await;

    let order_id = app
        .lifecycle
        .place_order(PlaceOrder {
            user_id: user,
            address_id: address,
            mode: OrderMode::Cart,
            delivery_time: None,
            items: Vec::new(),
        })
        .await
        .expect("cart order");

    assert_eq!(app.order_amount(order_id).await, 0.0);
    let order = app
        .lifecycle
        .orders()
        .get(order_id, user)
        .await
        .expect("order");
    assert!(order.items.is_empty());
    assert_eq!(order.status, OrderStatus::Processing);
}
