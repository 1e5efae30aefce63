//! Postgres pool setup and error mapping shared by every Postgres store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | `DbError` |
//! |------------|----------------------|-----------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `Reference` |
//! | Database (check constraint violation) | `23514` | `Check` |
//! | Database (other) | any other | `Other` |
//! | PoolClosed | N/A | `Unavailable` |
//! | RowNotFound | N/A | `NotFound` |
//! | Other | N/A | `Other` |

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::info;

use docflow_workflow::StoreError;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("conflict in {operation}: {message}")]
    Conflict { operation: String, message: String },

    #[error("reference violation in {operation}: {message}")]
    Reference { operation: String, message: String },

    #[error("check violation in {operation}: {message}")]
    Check { operation: String, message: String },

    #[error("connection pool closed in {0}")]
    Unavailable(String),

    #[error("row not found in {0}")]
    NotFound(String),

    #[error("database error in {operation}: {message}")]
    Other { operation: String, message: String },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DbError {
    let operation = operation.to_string();
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("23505") => DbError::Conflict { operation, message },
                Some("23503") => DbError::Reference { operation, message },
                Some("23514") => DbError::Check { operation, message },
                _ => DbError::Other { operation, message },
            }
        }
        sqlx::Error::PoolClosed => DbError::Unavailable(operation),
        sqlx::Error::RowNotFound => DbError::NotFound(operation),
        other => DbError::Other {
            operation,
            message: other.to_string(),
        },
    }
}

/// Check if an error is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

/// Wrap a row-level decoding failure (bad status code, invalid id) as a sqlx decode error.
pub(crate) fn decode_error(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

/// Milliseconds for binding into `interval '1 millisecond'` arithmetic.
pub(crate) fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Apply the embedded migrations in `crates/infra/migrations`.
pub async fn migrate(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::Other {
            operation: "migrate".to_string(),
            message: e.to_string(),
        })?;
    info!("database migrations applied");
    Ok(())
}
