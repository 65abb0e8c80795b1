use crate::error::{MarketError, MarketResult};
use crate::model::{Address, ModelId, NewAddress};
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AddressStore {
    pool: SqlitePool,
}

impl AddressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a saved location. When the new address is the default, every
    /// other address of the user is unset first, in the same transaction,
    /// keeping at most one non-archived default per user.
    pub async fn insert(&self, address: &NewAddress) -> MarketResult<ModelId> {
        let mut tx = self.pool.begin().await?;

        if address.is_default {
            sqlx::query("UPDATE address SET is_default = 0 WHERE user_id = ?")
                .bind(address.user_id)
                .execute(&mut *tx)
                .await?;
        }

        let address_id: ModelId = sqlx::query_scalar(
            r#"
            INSERT INTO address (user_id, address_data, address_tag, lat, long, is_default,
                                 updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(address.user_id)
        .bind(&address.address_data)
        .bind(&address.address_tag)
        .bind(address.lat)
        .bind(address.long)
        .bind(address.is_default)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(address_id)
    }

    /// All non-archived addresses for the user, newest first.
    pub async fn list(&self, user_id: ModelId) -> MarketResult<Vec<Address>> {
        let addresses = sqlx::query_as::<_, Address>(
            r#"
            SELECT id, user_id, address_data, address_tag, lat, long, is_default,
                   created_at, updated_at
            FROM address
            WHERE user_id = ? AND archived_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(addresses)
    }

    /// Marks an address as default, unsetting the user's others first.
    pub async fn set_default(&self, address_id: ModelId, user_id: ModelId) -> MarketResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE address SET is_default = 0 WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE address
            SET is_default = 1, updated_at = ?
            WHERE id = ? AND user_id = ? AND archived_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(address_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }

        tx.commit().await?;
        Ok(())
    }

    /// Archives an address. When the archived address was the default, one
    /// other non-archived address (if any) is promoted so the user keeps a
    /// default.
    pub async fn archive(&self, address_id: ModelId, user_id: ModelId) -> MarketResult<()> {
        let was_default = self.get(user_id, address_id, false).await?.is_default;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE address
            SET archived_at = ?, is_default = 0
            WHERE id = ? AND user_id = ? AND archived_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(address_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }

        if was_default {
            let successor: Option<ModelId> = sqlx::query_scalar(
                r#"
                SELECT id
                FROM address
                WHERE user_id = ? AND archived_at IS NULL AND id <> ?
                ORDER BY created_at DESC
                LIMIT 1
                "#,
            )
            .bind(user_id)
            .bind(address_id)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(successor) = successor {
                sqlx::query("UPDATE address SET is_default = 1 WHERE id = ?")
                    .bind(successor)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Ownership-scoped fetch. Archived addresses stay reachable when
    /// `include_archived` is set - historical orders join against them.
    pub async fn get(
        &self,
        user_id: ModelId,
        address_id: ModelId,
        include_archived: bool,
    ) -> MarketResult<Address> {
        let mut sql = String::from(
            r#"
            SELECT id, user_id, address_data, address_tag, lat, long, is_default,
                   created_at, updated_at
            FROM address
            WHERE user_id = ? AND id = ?
            "#,
        );
        if !include_archived {
            sql.push_str(" AND archived_at IS NULL");
        }

        sqlx::query_as::<_, Address>(&sql)
            .bind(user_id)
            .bind(address_id)
            .fetch_one(&self.pool)
            .await
            .map_err(MarketError::from_lookup)
    }

    /// The delivery address of an order, regardless of archival.
    pub async fn by_order(&self, order_id: ModelId) -> MarketResult<Address> {
        sqlx::query_as::<_, Address>(
            r#"
            SELECT a.id, a.user_id, a.address_data, a.address_tag, a.lat, a.long,
                   a.is_default, a.created_at, a.updated_at
            FROM address a
                     JOIN orders o ON a.id = o.address_id
            WHERE o.id = ?
            "#,
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(MarketError::from_lookup)
    }
}
