//! Data store (C2): persistent CRUD and the constrained queries the rest of
//! the core needs, backed by an embedded SQLite database.
//!
//! Constraint violations surface as [`crate::errors::CoreError::Conflict`];
//! missing rows as `NotFound`; every other engine error is `Fatal` for the
//! current request — the conversion lives in [`crate::errors`]'s
//! `From<sqlx::Error>` impl, this module only needs to interpret
//! `rows_affected() == 0` after a CAS `UPDATE` as a `Conflict` itself, since
//! SQLite does not report that as an error.

mod channels;
mod episodes;
mod queue_items;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool};

use crate::errors::{CoreError, CoreResult};

/// Handle to the embedded relational engine; the single source of truth for
/// Channel, Episode and QueueItem rows.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connects to `database_url`, creating the database file if it does not
    /// already exist, and applies embedded migrations.
    pub async fn connect(database_url: &str) -> CoreResult<Self> {
        use sqlx::migrate::MigrateDatabase;

        if database_url != "sqlite::memory:"
            && !Sqlite::database_exists(database_url)
                .await
                .unwrap_or(false)
        {
            Sqlite::create_database(database_url)
                .await
                .map_err(|e| CoreError::fatal(format!("creating database: {e}")))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| CoreError::fatal(format!("connecting to database: {e}")))?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .map_err(|e| CoreError::fatal(format!("running migrations: {e}")))?;

        Ok(Self { pool })
    }

    /// Connects to a fresh in-memory database with migrations applied.
    /// Used by integration tests as their entry point.
    pub async fn in_memory() -> CoreResult<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
