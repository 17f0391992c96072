//! PostgreSQL adapters for the repository traits in `warden-auth`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RepositoryError |
//! |------------|----------------------|-----------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any other | `Query` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | RowNotFound / ColumnDecode / other | N/A | `Query` |
//!
//! Every adapter is `Send + Sync` and cheap to clone; they share one pool.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use warden_auth::RepositoryError;

pub mod rbac;
pub mod services;
pub mod users;

pub use rbac::PostgresRbacRepository;
pub use services::PostgresServicePrincipalRepository;
pub use users::PostgresUserDirectory;

const SCHEMA: &str = include_str!("../../migrations/0001_warden.sql");

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Apply the schema. Every statement is idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    tracing::info!("database schema is up to date");
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RepositoryError::Conflict(msg),
                _ => RepositoryError::Query(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Unavailable(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            RepositoryError::Unavailable(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::Io(e) => RepositoryError::Unavailable(format!("io error in {operation}: {e}")),
        sqlx::Error::RowNotFound => {
            RepositoryError::Query(format!("unexpected row not found in {operation}"))
        }
        other => RepositoryError::Query(format!("sqlx error in {operation}: {other}")),
    }
}
