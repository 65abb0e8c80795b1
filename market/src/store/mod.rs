//! SQLite repositories over a shared connection pool.
//!
//! Every store receives the pool at construction; there is no process-wide
//! database handle. All multi-statement mutations run inside explicit
//! transactions so partially-created rows are never visible to readers.

use crate::error::MarketResult;
use sqlx::SqlitePool;

pub mod address;
pub mod disputes;
pub mod offers;
pub mod orders;
pub mod scheduled;
pub mod users;

pub use address::AddressStore;
pub use disputes::DisputeStore;
pub use offers::OfferStore;
pub use orders::OrderStore;
pub use scheduled::ScheduledOrderStore;
pub use users::UserStore;

/// Creates all tables and indexes if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> MarketResult<()> {
    let init_sql = include_str!("../../resources/init.sql");
    for statement in init_sql.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
