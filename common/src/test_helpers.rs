/// Shared test helpers for cross-crate use
///
/// Centralized test utilities used by the `market` integration tests to
/// avoid duplicating database setup across test files.
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// Global counter for unique test identifiers across parallel tests
static GLOBAL_TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate unique test identifiers that won't conflict across parallel tests.
///
/// Combines a millisecond timestamp with an atomic counter:
/// "{prefix}-{timestamp}-{counter}".
pub fn generate_unique_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let counter = GLOBAL_TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, timestamp, counter)
}

/// Create an in-memory SQLite pool for tests.
///
/// The pool is capped at a single connection: every connection to
/// `sqlite::memory:` gets its own database, so a larger pool would hand out
/// connections that cannot see the initialized schema.
pub async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory database")
}
