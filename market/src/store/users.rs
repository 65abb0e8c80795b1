use crate::error::{MarketError, MarketResult};
use crate::model::{FlagState, ModelId, OrderStatus, Permission, StaffLocation};
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Looks up a local user by the identity provider's subject id,
    /// creating one on first sight.
    pub async fn find_or_create(
        &self,
        auth_id: &str,
        name: Option<&str>,
        phone: &str,
        permission: Permission,
    ) -> MarketResult<ModelId> {
        let existing: Option<ModelId> =
            sqlx::query_scalar("SELECT id FROM users WHERE auth_id = ? AND archived_at IS NULL")
                .bind(auth_id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let mut tx = self.pool.begin().await?;
        let user_id: ModelId = sqlx::query_scalar(
            "INSERT INTO users (name, phone, auth_id) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(phone)
        .bind(auth_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO user_permission (user_id, permission_type) VALUES (?, ?)")
            .bind(user_id)
            .bind(permission)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user_id)
    }

    pub async fn grant_permission(
        &self,
        user_id: ModelId,
        permission: Permission,
    ) -> MarketResult<()> {
        sqlx::query("INSERT INTO user_permission (user_id, permission_type) VALUES (?, ?)")
            .bind(user_id)
            .bind(permission)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The user's flag counter plus the status of their most recent
    /// delivered/cancelled order since they were last unflagged. The
    /// latter decides whether a consequential cancellation escalates.
    pub async fn flag_state(&self, user_id: ModelId) -> MarketResult<FlagState> {
        let flags: i64 = sqlx::query_scalar("SELECT flags FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(MarketError::from_lookup)?;

        let last_terminal_status: Option<OrderStatus> = sqlx::query_scalar(
            r#"
            SELECT o.status
            FROM orders o
                     JOIN users u ON o.user_id = u.id
            WHERE o.user_id = ?
              AND o.created_at >= u.unflagged_at
              AND o.status IN (?, ?)
            ORDER BY o.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(OrderStatus::Delivered)
        .bind(OrderStatus::Cancelled)
        .fetch_optional(&self.pool)
        .await?;

        Ok(FlagState {
            flags,
            last_terminal_status,
        })
    }

    pub async fn set_flags(&self, user_id: ModelId, flags: i64) -> MarketResult<()> {
        sqlx::query("UPDATE users SET flags = ? WHERE id = ?")
            .bind(flags)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store-manager action: resets the counter and stamps `unflagged_at`,
    /// so flag accrual restarts from orders created after this moment.
    pub async fn unflag(&self, user_id: ModelId) -> MarketResult<()> {
        sqlx::query("UPDATE users SET flags = 0, unflagged_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Last reported positions of all enabled staff holding the given
    /// permission.
    pub async fn staff_locations(
        &self,
        permission: Permission,
    ) -> MarketResult<Vec<StaffLocation>> {
        let locations = sqlx::query_as::<_, StaffLocation>(
            r#"
            SELECT l.staff_id, l.lat, l.long
            FROM users u
                     JOIN user_permission up ON u.id = up.user_id
                     JOIN location l ON up.user_id = l.staff_id
            WHERE up.permission_type = ? AND u.enabled = 1
            "#,
        )
        .bind(permission)
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }

    /// Positions of all store managers, for service-area matching.
    pub async fn store_manager_locations(&self) -> MarketResult<Vec<StaffLocation>> {
        let locations = sqlx::query_as::<_, StaffLocation>(
            r#"
            SELECT u.id AS staff_id, l.lat, l.long
            FROM users u
                     JOIN user_permission up ON u.id = up.user_id
                     JOIN location l ON u.id = l.staff_id
            WHERE up.permission_type = ?
            "#,
        )
        .bind(Permission::StoreManager)
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }

    /// Polling-based position update: UPDATE first, INSERT when the staff
    /// member has no location row yet.
    pub async fn upsert_location(
        &self,
        staff_id: ModelId,
        lat: f64,
        long: f64,
    ) -> MarketResult<()> {
        let result =
            sqlx::query("UPDATE location SET lat = ?, long = ?, updated_at = ? WHERE staff_id = ?")
                .bind(lat)
                .bind(long)
                .bind(Utc::now())
                .bind(staff_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            sqlx::query("INSERT INTO location (staff_id, lat, long, updated_at) VALUES (?, ?, ?, ?)")
                .bind(staff_id)
                .bind(lat)
                .bind(long)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn location_of(&self, staff_id: ModelId) -> MarketResult<StaffLocation> {
        sqlx::query_as::<_, StaffLocation>(
            "SELECT staff_id, lat, long FROM location WHERE staff_id = ?",
        )
        .bind(staff_id)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from_lookup)
    }

    /// Average of user-submitted ratings across the staff member's orders.
    pub async fn staff_rating(&self, staff_id: ModelId) -> MarketResult<f64> {
        sqlx::query_scalar(
            "SELECT COALESCE(AVG(staff_rating), 0) FROM orders WHERE staff_id = ?",
        )
        .bind(staff_id)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from)
    }
}
