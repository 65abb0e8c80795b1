use crate::error::{MarketError, MarketResult};
use crate::model::{
    weekday_name, DueTemplate, ModelId, NewScheduledOrder, OrderItem, OrderMode, OrderStatus,
    OrderType, ScheduledOrder, ScheduledOrderDay,
};
use crate::otp::generate_otp;
use chrono::{NaiveDate, TimeZone, Utc};
use log::debug;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct ScheduledOrderStore {
    pool: SqlitePool,
}

impl ScheduledOrderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a recurring-order template with its weekday entries and item
    /// snapshot in one transaction.
    ///
    /// Template amounts carry no discount - the discount is resolved at each
    /// materialization against the offer active that day.
    pub async fn insert(&self, order: &NewScheduledOrder) -> MarketResult<ModelId> {
        let mut tx = self.pool.begin().await?;

        let template_id: ModelId = sqlx::query_scalar(
            r#"
            INSERT INTO scheduled_orders (user_id, address_id, mode, start_date, end_date,
                                          sm_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(order.user_id)
        .bind(order.address_id)
        .bind(order.mode)
        .bind(order.start_date)
        .bind(order.end_date)
        .bind(order.sm_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        for weekday in &order.weekdays {
            sqlx::query(
                r#"
                INSERT INTO scheduled_orders_days (scheduled_order_id, weekday, delivery_time,
                                                   created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(template_id)
            .bind(weekday_name(*weekday))
            .bind(order.delivery_time)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO scheduled_ordered_items (order_id, item_id, name, price, category,
                                                     base_quantity, strikethrough_price, quantity)
                SELECT ?, items.id, items.name, items.price, c.category,
                       items.base_quantity, items.strikethrough_price, ?
                FROM items
                         JOIN categories c ON c.id = items.category
                WHERE items.id = ?
                "#,
            )
            .bind(template_id)
            .bind(item.quantity)
            .bind(item.item_id)
            .execute(&mut *tx)
            .await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE scheduled_orders
            SET amount = (SELECT COALESCE(SUM(price * quantity), 0)
                          FROM scheduled_ordered_items
                          WHERE order_id = ?)
            WHERE id = ?
            "#,
        )
        .bind(template_id)
        .bind(template_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }

        tx.commit().await?;
        Ok(template_id)
    }

    /// Ownership-scoped fetch with weekday entries and item snapshot.
    pub async fn get(&self, template_id: ModelId, user_id: ModelId) -> MarketResult<ScheduledOrder> {
        let mut template = sqlx::query_as::<_, ScheduledOrder>(
            r#"
            SELECT id, user_id, staff_id, address_id, mode, amount, start_date, end_date,
                   sm_id, created_at
            FROM scheduled_orders
            WHERE archived_at IS NULL AND id = ? AND user_id = ?
            "#,
        )
        .bind(template_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from_lookup)?;

        template.days = self.days_for(template_id).await?;
        template.items = self.items_for(template_id).await?;
        Ok(template)
    }

    /// All non-archived templates for a user, newest first.
    pub async fn list(&self, user_id: ModelId) -> MarketResult<Vec<ScheduledOrder>> {
        let mut templates = sqlx::query_as::<_, ScheduledOrder>(
            r#"
            SELECT id, user_id, staff_id, address_id, mode, amount, start_date, end_date,
                   sm_id, created_at
            FROM scheduled_orders
            WHERE archived_at IS NULL AND user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        for template in &mut templates {
            template.days = self.days_for(template.id).await?;
            template.items = self.items_for(template.id).await?;
        }
        Ok(templates)
    }

    /// Archives a template with its day entries and, for delivery mode, its
    /// item snapshot. Ownership-guarded; archiving twice is `NotFound`.
    pub async fn archive(&self, template_id: ModelId, user_id: ModelId) -> MarketResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let mode: Option<OrderMode> = sqlx::query_scalar(
            r#"
            UPDATE scheduled_orders
            SET archived_at = ?
            WHERE archived_at IS NULL AND id = ? AND user_id = ?
            RETURNING mode
            "#,
        )
        .bind(now)
        .bind(template_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let mode = mode.ok_or(MarketError::NotFound)?;

        let result = sqlx::query(
            r#"
            UPDATE scheduled_orders_days
            SET archived_at = ?
            WHERE archived_at IS NULL AND scheduled_order_id = ?
            "#,
        )
        .bind(now)
        .bind(template_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }

        if mode == OrderMode::Delivery {
            let result = sqlx::query(
                r#"
                UPDATE scheduled_ordered_items
                SET archived_at = ?
                WHERE archived_at IS NULL AND order_id = ?
                "#,
            )
            .bind(now)
            .bind(template_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MarketError::NotFound);
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Active templates whose window contains `today` and which recur on
    /// today's weekday.
    pub async fn due_on(&self, today: NaiveDate) -> MarketResult<Vec<DueTemplate>> {
        let weekday = weekday_name(chrono::Datelike::weekday(&today));
        let templates = sqlx::query_as::<_, DueTemplate>(
            r#"
            SELECT so.id, so.mode, so.user_id, sod.delivery_time
            FROM scheduled_orders so
                     JOIN scheduled_orders_days sod ON so.id = sod.scheduled_order_id
            WHERE sod.weekday = ?
              AND so.start_date <= ?
              AND (so.end_date IS NULL OR so.end_date >= ?)
              AND sod.archived_at IS NULL
              AND so.archived_at IS NULL
            "#,
        )
        .bind(weekday)
        .bind(today)
        .bind(today)
        .fetch_all(&self.pool)
        .await?;
        Ok(templates)
    }

    /// Copies one due template into a live order for the given calendar
    /// occurrence, in its own transaction.
    ///
    /// The live order seeds at status `scheduled` with a fresh OTP; for
    /// delivery mode the item snapshot joins the template's item list
    /// against *current* catalog prices and the currently active discount.
    /// The unique (template, occurrence) index makes a repeat run a no-op:
    /// returns `None` when the occurrence already exists.
    pub async fn materialize(
        &self,
        template: &DueTemplate,
        occurrence: NaiveDate,
    ) -> MarketResult<Option<ModelId>> {
        let delivery_time = Utc
            .from_utc_datetime(&occurrence.and_time(template.delivery_time));

        let mut tx = self.pool.begin().await?;

        let order_id: Option<ModelId> = sqlx::query_scalar(
            r#"
            INSERT INTO orders (mode, order_type, user_id, staff_id, address_id, status,
                                amount, delivery_time, sm_id, template_id, occurrence_date,
                                created_at)
            SELECT so.mode, ?, so.user_id, so.staff_id, so.address_id, ?,
                   0, ?, so.sm_id, so.id, ?, ?
            FROM scheduled_orders so
            WHERE so.id = ?
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(OrderType::Scheduled)
        .bind(OrderStatus::Scheduled)
        .bind(delivery_time)
        .bind(occurrence)
        .bind(Utc::now())
        .bind(template.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order_id) = order_id else {
            debug!(
                "template {} already materialized for {}, skipping",
                template.id, occurrence
            );
            return Ok(None);
        };

        sqlx::query("INSERT INTO order_otp (order_id, otp) VALUES (?, ?)")
            .bind(order_id)
            .bind(generate_otp())
            .execute(&mut *tx)
            .await?;

        if template.mode == OrderMode::Delivery {
            let discount: i64 =
                sqlx::query_scalar("SELECT discount FROM offers WHERE archived_at IS NULL")
                    .fetch_optional(&mut *tx)
                    .await?
                    .unwrap_or(0);

            // Prices float to the current catalog at each materialization;
            // only names/quantities come from the template snapshot.
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, item_id, name, price, category,
                                         base_quantity, strikethrough_price, quantity, discount)
                SELECT ?, soi.item_id, soi.name, i.price, soi.category,
                       soi.base_quantity, i.strikethrough_price, soi.quantity, ?
                FROM scheduled_ordered_items soi
                         JOIN items i ON soi.item_id = i.id
                WHERE soi.order_id = ?
                "#,
            )
            .bind(order_id)
            .bind(discount)
            .bind(template.id)
            .execute(&mut *tx)
            .await?;

            let result = sqlx::query(
                r#"
                UPDATE orders
                SET amount = (SELECT COALESCE(SUM((price - price * discount / 100.0) * quantity), 0)
                              FROM order_items
                              WHERE order_id = ?)
                WHERE id = ?
                "#,
            )
            .bind(order_id)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MarketError::NotFound);
            }
        }

        tx.commit().await?;
        debug!(
            "materialized template {} into order {order_id} for {occurrence}",
            template.id
        );
        Ok(Some(order_id))
    }

    async fn days_for(&self, template_id: ModelId) -> MarketResult<Vec<ScheduledOrderDay>> {
        let days = sqlx::query_as::<_, ScheduledOrderDay>(
            r#"
            SELECT weekday, delivery_time
            FROM scheduled_orders_days
            WHERE scheduled_order_id = ? AND archived_at IS NULL
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(days)
    }

    async fn items_for(&self, template_id: ModelId) -> MarketResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT item_id, name, price, category, base_quantity,
                   strikethrough_price, quantity, 0 AS discount
            FROM scheduled_ordered_items
            WHERE order_id = ? AND archived_at IS NULL
            "#,
        )
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}
