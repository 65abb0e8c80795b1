use crate::error::{MarketError, MarketResult};
use crate::model::ModelId;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Dispute {
    pub order_id: ModelId,
    pub user_id: ModelId,
    pub disputed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct DisputeStore {
    pool: SqlitePool,
}

impl DisputeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(&self, order_id: ModelId, user_id: ModelId) -> MarketResult<()> {
        sqlx::query(
            "INSERT INTO disputed_orders (order_id, user_id, disputed_at) VALUES (?, ?, ?)",
        )
        .bind(order_id)
        .bind(user_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_open(&self) -> MarketResult<Vec<Dispute>> {
        let disputes = sqlx::query_as::<_, Dispute>(
            r#"
            SELECT order_id, user_id, disputed_at, resolved_at
            FROM disputed_orders
            WHERE resolved_at IS NULL
            ORDER BY disputed_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(disputes)
    }

    pub async fn resolve(&self, order_id: ModelId, resolver_id: ModelId) -> MarketResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE disputed_orders
            SET resolved_at = ?, resolved_by = ?
            WHERE order_id = ? AND resolved_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(resolver_id)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }
}
