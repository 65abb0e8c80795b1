use crate::error::{MarketError, MarketResult};
use crate::model::Offer;
use chrono::Utc;
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct OfferStore {
    pool: SqlitePool,
}

impl OfferStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a new global offer, archiving whichever one was active.
    /// At most one non-archived offer exists at any time.
    pub async fn create(
        &self,
        title: &str,
        description: Option<&str>,
        discount: i64,
    ) -> MarketResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE offers SET archived_at = ? WHERE archived_at IS NULL")
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO offers (title, description, discount) VALUES (?, ?, ?)")
            .bind(title)
            .bind(description)
            .bind(discount)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Retires the active offer; `NotFound` when none is active.
    pub async fn archive_active(&self) -> MarketResult<()> {
        let result = sqlx::query("UPDATE offers SET archived_at = ? WHERE archived_at IS NULL")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }

    /// The currently active offer; a zero-discount placeholder when none is
    /// active, so snapshot inserts always have a discount to copy.
    pub async fn active(&self) -> MarketResult<Offer> {
        let offer = sqlx::query_as::<_, Offer>(
            "SELECT id, title, description, discount FROM offers WHERE archived_at IS NULL",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(offer.unwrap_or_default())
    }
}
