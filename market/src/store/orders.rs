use crate::error::{MarketError, MarketResult};
use crate::model::{
    ModelId, NewOrder, OpenOrder, Order, OrderItem, OrderMode, OrderStatus, OrderTracking,
};
use crate::otp::generate_otp;
use crate::patch::OrderPatch;
use chrono::{DateTime, Utc};
use log::debug;
use sqlx::SqlitePool;

/// Columns selected for every full [`Order`] read; the OTP rides along from
/// a LEFT JOIN so deleted codes surface as NULL.
const ORDER_COLUMNS: &str = "o.id, o.mode, o.order_type, o.user_id, o.staff_id, o.address_id, \
     o.status, o.amount, oo.otp AS otp, o.user_rating, o.staff_rating, o.delivery_time, \
     o.sm_id, o.template_id, o.occurrence_date, o.created_at, o.updated_at";

#[derive(Clone)]
pub struct OrderStore {
    pool: SqlitePool,
}

impl OrderStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates an order with its OTP row and item snapshot in one
    /// transaction, so a reader never observes a half-created order.
    ///
    /// Items are copied from the current catalog state together with the
    /// currently active discount; the persisted amount is recomputed from
    /// the snapshot, never taken from the caller.
    pub async fn insert(&self, order: &NewOrder) -> MarketResult<ModelId> {
        debug!(
            "creating {:?} order for user {}",
            order.mode, order.user_id
        );
        let mut tx = self.pool.begin().await?;

        let order_id: ModelId = sqlx::query_scalar(
            r#"
            INSERT INTO orders (mode, order_type, user_id, address_id, status, amount,
                                delivery_time, sm_id, created_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(order.mode)
        .bind(order.order_type)
        .bind(order.user_id)
        .bind(order.address_id)
        .bind(OrderStatus::Processing)
        .bind(order.delivery_time)
        .bind(order.sm_id)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO order_otp (order_id, otp) VALUES (?, ?)")
            .bind(order_id)
            .bind(generate_otp())
            .execute(&mut *tx)
            .await?;

        let discount: i64 =
            sqlx::query_scalar("SELECT discount FROM offers WHERE archived_at IS NULL")
                .fetch_optional(&mut *tx)
                .await?
                .unwrap_or(0);

        for item in &order.items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, item_id, name, price, category,
                                         base_quantity, strikethrough_price, quantity, discount)
                SELECT ?, items.id, items.name, items.price, c.category,
                       items.base_quantity, items.strikethrough_price, ?, ?
                FROM items
                         JOIN categories c ON c.id = items.category
                WHERE items.id = ?
                "#,
            )
            .bind(order_id)
            .bind(item.quantity)
            .bind(discount)
            .bind(item.item_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
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

        tx.commit().await?;
        debug!("created order {order_id}");
        Ok(order_id)
    }

    /// Ownership-scoped fetch: the order must belong to the given user.
    pub async fn get(&self, order_id: ModelId, user_id: ModelId) -> MarketResult<Order> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
                     LEFT JOIN order_otp oo ON o.id = oo.order_id
            WHERE o.id = ? AND o.user_id = ?
            "#
        );
        let mut order = sqlx::query_as::<_, Order>(&sql)
            .bind(order_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(MarketError::from_lookup)?;
        order.items = self.items_for(order_id).await?;
        Ok(order)
    }

    /// Status plus the assigned staff member's last reported position.
    pub async fn tracking(&self, order_id: ModelId) -> MarketResult<OrderTracking> {
        sqlx::query_as::<_, OrderTracking>(
            r#"
            SELECT o.status, o.staff_id, l.lat, l.long
            FROM orders o
                     LEFT JOIN location l ON o.staff_id = l.staff_id
            WHERE o.id = ?
            "#,
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from_lookup)
    }

    pub async fn owner_of(&self, order_id: ModelId) -> MarketResult<ModelId> {
        sqlx::query_scalar("SELECT user_id FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(MarketError::from_lookup)
    }

    pub async fn status_of(&self, order_id: ModelId) -> MarketResult<OrderStatus> {
        sqlx::query_scalar("SELECT status FROM orders WHERE id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(MarketError::from_lookup)
    }

    /// Terminal orders for the user, newest first.
    pub async fn past_orders(
        &self,
        user_id: ModelId,
        offset: i64,
        limit: i64,
    ) -> MarketResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
                     LEFT JOIN order_otp oo ON o.id = oo.order_id
            WHERE o.user_id = ? AND o.status IN (?, ?, ?)
            ORDER BY o.created_at DESC
            LIMIT ? OFFSET ?
            "#
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .bind(OrderStatus::Declined)
            .bind(OrderStatus::Delivered)
            .bind(OrderStatus::Cancelled)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        self.attach_items(orders).await
    }

    /// In-flight "now" orders for the user; when none exist, falls back to
    /// materialized scheduled orders close enough to their delivery time.
    pub async fn active_orders(
        &self,
        user_id: ModelId,
        offset: i64,
        limit: i64,
        activation_cutoff: DateTime<Utc>,
    ) -> MarketResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
                     LEFT JOIN order_otp oo ON o.id = oo.order_id
            WHERE o.user_id = ? AND o.status IN (?, ?, ?) AND o.order_type = ?
            ORDER BY o.created_at DESC
            LIMIT ? OFFSET ?
            "#
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .bind(OrderStatus::OutForDelivery)
            .bind(OrderStatus::Accepted)
            .bind(OrderStatus::Processing)
            .bind(crate::model::OrderType::Now)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        if !orders.is_empty() {
            return self.attach_items(orders).await;
        }

        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
                     LEFT JOIN order_otp oo ON o.id = oo.order_id
            WHERE o.user_id = ? AND o.status IN (?, ?) AND o.order_type = ?
              AND o.delivery_time <= ?
            ORDER BY o.created_at DESC
            LIMIT ? OFFSET ?
            "#
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(user_id)
            .bind(OrderStatus::OutForDelivery)
            .bind(OrderStatus::Accepted)
            .bind(crate::model::OrderType::Scheduled)
            .bind(activation_cutoff)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        self.attach_items(orders).await
    }

    /// Sparse update. Only fields present in the patch are written; the
    /// optional user id adds an ownership guard to the WHERE clause.
    ///
    /// Returns the affected-row count - callers distinguish a no-op from a
    /// successful write, because both complete without a database error.
    pub async fn update(
        &self,
        order_id: ModelId,
        patch: &OrderPatch,
        user_guard: Option<ModelId>,
    ) -> MarketResult<u64> {
        let mut sql = format!("UPDATE orders SET {} WHERE id = ?", patch.set_clause());
        if user_guard.is_some() {
            sql.push_str(" AND user_id = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(staff_id) = patch.staff_id {
            query = query.bind(staff_id);
        }
        if let Some(amount) = patch.amount {
            query = query.bind(amount);
        }
        if let Some(user_rating) = patch.user_rating {
            query = query.bind(user_rating);
        }
        if let Some(staff_rating) = patch.staff_rating {
            query = query.bind(staff_rating);
        }
        if let Some(status) = patch.status {
            query = query.bind(status);
        }
        query = query.bind(Utc::now()).bind(order_id);
        if let Some(user_id) = user_guard {
            query = query.bind(user_id);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Conditional self-accept. Succeeds only while the order is still
    /// unassigned and `processing`, so of two concurrent attempts exactly
    /// one wins and the loser sees `false`.
    pub async fn try_accept(&self, order_id: ModelId, staff_id: ModelId) -> MarketResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET staff_id = ?, status = ?, updated_at = ?
            WHERE id = ? AND status = ? AND staff_id IS NULL
            "#,
        )
        .bind(staff_id)
        .bind(OrderStatus::Accepted)
        .bind(Utc::now())
        .bind(order_id)
        .bind(OrderStatus::Processing)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Store-manager reassignment: same `processing`-only precondition as
    /// self-accept, but tolerates an already-set staff id.
    pub async fn try_reassign(&self, order_id: ModelId, staff_id: ModelId) -> MarketResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET staff_id = ?, status = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(staff_id)
        .bind(OrderStatus::Accepted)
        .bind(Utc::now())
        .bind(order_id)
        .bind(OrderStatus::Processing)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move an accepted order the staff member owns to `outForDelivery`.
    /// `false` when the order is in any other state or held by someone else.
    pub async fn try_start_delivery(
        &self,
        order_id: ModelId,
        staff_id: ModelId,
    ) -> MarketResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?, updated_at = ?
            WHERE id = ? AND staff_id = ? AND status = ?
            "#,
        )
        .bind(OrderStatus::OutForDelivery)
        .bind(Utc::now())
        .bind(order_id)
        .bind(staff_id)
        .bind(OrderStatus::Accepted)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Settles an `outForDelivery` order held by this staff member. The
    /// guard keeps a code that leaked early from settling an order that was
    /// never dispatched, and a stranger from settling someone else's.
    pub async fn try_deliver(
        &self,
        order_id: ModelId,
        staff_id: ModelId,
        user_rating: Option<f64>,
    ) -> MarketResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?, user_rating = COALESCE(?, user_rating), updated_at = ?
            WHERE id = ? AND staff_id = ? AND status = ?
            "#,
        )
        .bind(OrderStatus::Delivered)
        .bind(user_rating)
        .bind(Utc::now())
        .bind(order_id)
        .bind(staff_id)
        .bind(OrderStatus::OutForDelivery)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Owner-scoped cancel, conditional on the status the caller last
    /// observed. A transition that lands in between makes this a no-op
    /// instead of overwriting the newer state.
    pub async fn try_cancel(
        &self,
        order_id: ModelId,
        user_id: ModelId,
        expected: OrderStatus,
    ) -> MarketResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?, updated_at = ?
            WHERE id = ? AND user_id = ? AND status = ?
            "#,
        )
        .bind(OrderStatus::Cancelled)
        .bind(Utc::now())
        .bind(order_id)
        .bind(user_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Moves a materialized order into the live lifecycle. Conditional on
    /// `scheduled` so a cancellation racing the initiator wins.
    pub async fn try_activate(&self, order_id: ModelId, user_id: ModelId) -> MarketResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?, updated_at = ?
            WHERE id = ? AND user_id = ? AND status = ?
            "#,
        )
        .bind(OrderStatus::Processing)
        .bind(Utc::now())
        .bind(order_id)
        .bind(user_id)
        .bind(OrderStatus::Scheduled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Re-derive the order total from its item snapshot. Client-reported
    /// amounts are never written back.
    pub async fn recompute_amount(&self, order_id: ModelId) -> MarketResult<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET amount = COALESCE((
                SELECT SUM((oi.price - oi.price * oi.discount / 100.0) * oi.quantity)
                FROM order_items oi
                WHERE oi.order_id = orders.id
            ), 0)
            WHERE id = ?
            "#,
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Non-terminal assignments currently held by the staff member.
    pub async fn active_count_for_staff(&self, staff_id: ModelId) -> MarketResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(id) FROM orders WHERE staff_id = ? AND status IN (?, ?)",
        )
        .bind(staff_id)
        .bind(OrderStatus::Accepted)
        .bind(OrderStatus::OutForDelivery)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from)
    }

    /// Other orders this staff member already has out for delivery.
    pub async fn other_out_for_delivery_count(
        &self,
        staff_id: ModelId,
        order_id: ModelId,
    ) -> MarketResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(id) FROM orders WHERE staff_id = ? AND status = ? AND id <> ?",
        )
        .bind(staff_id)
        .bind(OrderStatus::OutForDelivery)
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from)
    }

    pub async fn otp(&self, order_id: ModelId) -> MarketResult<i64> {
        sqlx::query_scalar("SELECT otp FROM order_otp WHERE order_id = ?")
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(MarketError::from_lookup)
    }

    /// One-time use: the OTP row is removed on successful delivery
    /// confirmation, so a replay fails with `NotFound`.
    pub async fn delete_otp(&self, order_id: ModelId) -> MarketResult<()> {
        let result = sqlx::query("DELETE FROM order_otp WHERE order_id = ?")
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }

    /// Bulk-declines unassigned `processing` orders whose delivery time has
    /// aged beyond the cutoff. Returns (order id, user id) pairs for
    /// best-effort user notification.
    pub async fn decline_overdue(
        &self,
        cutoff: DateTime<Utc>,
    ) -> MarketResult<Vec<(ModelId, ModelId)>> {
        let rows: Vec<(ModelId, ModelId)> = sqlx::query_as(
            r#"
            UPDATE orders
            SET status = ?, updated_at = ?
            WHERE id IN (SELECT id
                         FROM orders
                         WHERE staff_id IS NULL
                           AND status = ?
                           AND delivery_time <= ?)
            RETURNING id, user_id
            "#,
        )
        .bind(OrderStatus::Declined)
        .bind(Utc::now())
        .bind(OrderStatus::Processing)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Materialized scheduled orders whose delivery time falls before the
    /// given activation horizon.
    pub async fn scheduled_due(
        &self,
        horizon: DateTime<Utc>,
    ) -> MarketResult<Vec<(ModelId, ModelId, ModelId, OrderMode)>> {
        let rows: Vec<(ModelId, ModelId, ModelId, OrderMode)> = sqlx::query_as(
            r#"
            SELECT id, user_id, address_id, mode
            FROM orders
            WHERE status = ? AND delivery_time <= ?
            "#,
        )
        .bind(OrderStatus::Scheduled)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Unassigned `processing` orders older than the cutoff, surfaced to
    /// store managers for manual reassignment before the watchdog declines
    /// them.
    pub async fn stale_unassigned(&self, cutoff: DateTime<Utc>) -> MarketResult<Vec<OpenOrder>> {
        let orders = sqlx::query_as::<_, OpenOrder>(
            r#"
            SELECT o.id AS order_id, o.user_id, a.address_data, a.lat, a.long, o.delivery_time
            FROM orders o
                     JOIN address a ON a.id = o.address_id
            WHERE o.status = ?
              AND o.staff_id IS NULL
              AND o.delivery_time <= ?
            ORDER BY o.delivery_time
            "#,
        )
        .bind(OrderStatus::Processing)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Unassigned `processing` orders of the given mode, excluding ones the
    /// staff member has rejected. Radius filtering happens in the caller.
    pub async fn open_orders(
        &self,
        staff_id: ModelId,
        mode: OrderMode,
    ) -> MarketResult<Vec<OpenOrder>> {
        let orders = sqlx::query_as::<_, OpenOrder>(
            r#"
            SELECT o.id AS order_id, o.user_id, a.address_data, a.lat, a.long, o.delivery_time
            FROM orders o
                     JOIN address a ON o.address_id = a.id
            WHERE o.status = ?
              AND o.staff_id IS NULL
              AND o.mode = ?
              AND o.id NOT IN (SELECT order_id FROM rejected_orders WHERE staff_id = ?)
            ORDER BY o.delivery_time
            "#,
        )
        .bind(OrderStatus::Processing)
        .bind(mode)
        .bind(staff_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    /// Hides an order from this staff member's new-order feed.
    pub async fn reject(&self, staff_id: ModelId, order_id: ModelId) -> MarketResult<()> {
        sqlx::query("INSERT INTO rejected_orders (order_id, staff_id) VALUES (?, ?)")
            .bind(order_id)
            .bind(staff_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Orders currently assigned to the staff member, oldest first.
    pub async fn active_orders_for_staff(
        &self,
        staff_id: ModelId,
        mode: OrderMode,
    ) -> MarketResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
                     LEFT JOIN order_otp oo ON o.id = oo.order_id
            WHERE o.staff_id = ? AND o.mode = ? AND o.status IN (?, ?)
            ORDER BY o.created_at
            "#
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(staff_id)
            .bind(mode)
            .bind(OrderStatus::Accepted)
            .bind(OrderStatus::OutForDelivery)
            .fetch_all(&self.pool)
            .await?;
        self.attach_items(orders).await
    }

    /// Delivered/cancelled history for a staff member, newest first.
    pub async fn completed_orders_for_staff(
        &self,
        staff_id: ModelId,
        offset: i64,
        limit: i64,
    ) -> MarketResult<Vec<Order>> {
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders o
                     LEFT JOIN order_otp oo ON o.id = oo.order_id
            WHERE o.staff_id = ? AND o.status IN (?, ?)
            ORDER BY o.created_at DESC
            LIMIT ? OFFSET ?
            "#
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(staff_id)
            .bind(OrderStatus::Delivered)
            .bind(OrderStatus::Cancelled)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        self.attach_items(orders).await
    }

    pub async fn items_for(&self, order_id: ModelId) -> MarketResult<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT item_id, name, price, category, base_quantity,
                   strikethrough_price, quantity, discount
            FROM order_items
            WHERE order_id = ?
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn attach_items(&self, mut orders: Vec<Order>) -> MarketResult<Vec<Order>> {
        for order in &mut orders {
            order.items = self.items_for(order.id).await?;
        }
        Ok(orders)
    }
}
