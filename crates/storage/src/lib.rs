//! Storage layer: connection pooling and the Postgres analytics store.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod analytics_store;
pub mod error;

pub use analytics_store::PgAnalyticsStore;
pub use error::StorageError;

/// Creates a PostgreSQL connection pool for one report cycle.
pub async fn create_pool(connection_string: &str) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(connection_string)
        .await
        .map_err(StorageError::Connection)
}
