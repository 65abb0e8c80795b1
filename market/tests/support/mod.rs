#![allow(dead_code)]

use std::sync::Arc;

use common::test_helpers::{generate_unique_id, memory_pool};
use market::lifecycle::{Lifecycle, PlaceOrder};
use market::model::{ItemRequest, ModelId, NewAddress, OrderMode, Permission};
use market::notify::LogNotifier;
use market::store::init_schema;
use sqlx::SqlitePool;

/// Reference point the seeded manager, staff and addresses cluster around.
pub const LAT: f64 = 28.6139;
pub const LONG: f64 = 77.2090;

pub struct TestApp {
    pub pool: SqlitePool,
    pub lifecycle: Lifecycle,
}

pub async fn setup() -> TestApp {
    let pool = memory_pool().await;
    init_schema(&pool).await.expect("failed to initialize schema");
    let lifecycle = Lifecycle::new(pool.clone(), Arc::new(LogNotifier));
    TestApp { pool, lifecycle }
}

impl TestApp {
    pub async fn seed_user(&self, permission: Permission) -> ModelId {
        self.lifecycle
            .users()
            .find_or_create(
                &generate_unique_id("auth"),
                Some("Test User"),
                "555-0100",
                permission,
            )
            .await
            .expect("failed to seed user")
    }

    /// Staff member with a reported location.
    pub async fn seed_staff(&self, permission: Permission, lat: f64, long: f64) -> ModelId {
        let staff_id = self.seed_user(permission).await;
        self.lifecycle
            .users()
            .upsert_location(staff_id, lat, long)
            .await
            .expect("failed to seed staff location");
        staff_id
    }

    /// Store manager covering the reference point; placement requires one.
    pub async fn seed_manager(&self) -> ModelId {
        self.seed_staff(Permission::StoreManager, LAT, LONG).await
    }

    pub async fn seed_address(&self, user_id: ModelId) -> ModelId {
        self.seed_address_at(user_id, LAT, LONG).await
    }

    pub async fn seed_address_at(&self, user_id: ModelId, lat: f64, long: f64) -> ModelId {
        self.lifecycle
            .addresses()
            .insert(&NewAddress {
                user_id,
                address_data: "12 Test Lane".to_string(),
                address_tag: Some("home".to_string()),
                lat,
                long,
                is_default: true,
            })
            .await
            .expect("failed to seed address")
    }

    pub async fn seed_item(&self, name: &str, price: f64) -> ModelId {
        let category: ModelId =
            sqlx::query_scalar("INSERT INTO categories (category) VALUES ('Grocery') RETURNING id")
                .fetch_one(&self.pool)
                .await
                .expect("failed to seed category");
        sqlx::query_scalar("INSERT INTO items (name, price, category) VALUES (?, ?, ?) RETURNING id")
            .bind(name)
            .bind(price)
            .bind(category)
            .fetch_one(&self.pool)
            .await
            .expect("failed to seed item")
    }

    /// Places a delivery order through the full placement path.
    pub async fn place_delivery_order(
        &self,
        user_id: ModelId,
        address_id: ModelId,
        items: Vec<ItemRequest>,
    ) -> ModelId {
        self.lifecycle
            .place_order(PlaceOrder {
                user_id,
                address_id,
                mode: OrderMode::Delivery,
                delivery_time: None,
                items,
            })
            .await
            .expect("failed to place order")
    }

    pub async fn order_amount(&self, order_id: ModelId) -> f64 {
        sqlx::query_scalar("SELECT amount FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .expect("failed to read amount")
    }

    pub async fn order_status(&self, order_id: ModelId) -> String {
        sqlx::query_scalar("SELECT status FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .expect("failed to read status")
    }

    pub async fn flags_of(&self, user_id: ModelId) -> i64 {
        sqlx::query_scalar("SELECT flags FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .expect("failed to read flags")
    }

    pub async fn otp_of(&self, order_id: ModelId) -> Option<i64> {
        sqlx::query_scalar("SELECT otp FROM order_otp WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .expect("failed to read otp")
    }

    pub async fn orders_for_template(&self, template_id: ModelId) -> i64 {
        sqlx::query_scalar("SELECT COUNT(id) FROM orders WHERE template_id = ?")
            .bind(template_id)
            .fetch_one(&self.pool)
            .await
            .expect("failed to count materialized orders")
    }
}
