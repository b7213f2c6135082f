use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::config;

/// Errors from DatabaseManager and the repositories built on it
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    QueryError(String),

    /// Unique, foreign key, check or length violations raised while saving
    #[error("{0}")]
    Integrity(String),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 23xxx integrity constraint violation, 22001 string too long
            let integrity = db_err
                .code()
                .map(|code| code.starts_with("23") || code == "22001")
                .unwrap_or(false);
            if integrity {
                return DatabaseError::Integrity(db_err.message().to_string());
            }
        }
        DatabaseError::Sqlx(err)
    }
}

/// Process-wide connection pool
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    fn instance() -> Result<&'static DatabaseManager, DatabaseError> {
        static INSTANCE: OnceLock<DatabaseManager> = OnceLock::new();
        if let Some(manager) = INSTANCE.get() {
            return Ok(manager);
        }
        let manager = DatabaseManager { pool: Self::connect_lazy()? };
        Ok(INSTANCE.get_or_init(|| manager))
    }

    /// Shared pool. Connections are opened on first use, so a missing
    /// database only surfaces when a query is made.
    pub fn pool() -> Result<PgPool, DatabaseError> {
        Ok(Self::instance()?.pool.clone())
    }

    /// Start a transaction on the shared pool
    pub async fn begin() -> Result<Transaction<'static, Postgres>, DatabaseError> {
        Ok(Self::pool()?.begin().await?)
    }

    fn connect_lazy() -> Result<PgPool, DatabaseError> {
        let settings = &config().database;
        let url = settings
            .url
            .as_deref()
            .ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        url::Url::parse(url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect_lazy(url)?;

        info!("Created lazy database pool (max {} connections)", settings.max_connections);
        Ok(pool)
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check() -> Result<(), DatabaseError> {
        let pool = Self::pool()?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Apply the embedded SQL migrations
    pub async fn migrate() -> Result<(), DatabaseError> {
        let pool = Self::pool()?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Migrations applied");
        Ok(())
    }

    /// Close the pool (e.g., on shutdown)
    pub async fn close() {
        match Self::instance() {
            Ok(manager) => {
                manager.pool.close().await;
                info!("Closed database pool");
            }
            Err(e) => warn!("No database pool to close: {}", e),
        }
    }
}

/// Commit when `result` is Ok, roll back otherwise, and hand `result` back
pub async fn finish<T, E>(tx: Transaction<'static, Postgres>, result: Result<T, E>) -> Result<T, E>
where
    E: From<DatabaseError>,
{
    match result {
        Ok(value) => {
            tx.commit().await.map_err(DatabaseError::from)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_sqlx_errors_are_not_integrity_errors() {
        let err = DatabaseError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DatabaseError::Sqlx(sqlx::Error::RowNotFound)));
    }
}
