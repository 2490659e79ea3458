pub mod models;
pub mod role_bindings;
pub mod roles;
pub mod tokens;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Storage error taxonomy. Postgres unique-violation codes are translated
/// into the domain kinds (`AlreadyExists`/`NameTaken`) here, at the one place
/// that knows about SQLSTATEs — everything above this module only ever sees
/// `StoreError`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("name already taken")]
    NameTaken,
    #[error("mutator invoked without an open transaction context")]
    MissingContextTx,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    fn from_insert_error(err: sqlx::Error, name_constraint: &str, id_constraint: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or_default();
                if constraint == name_constraint {
                    return StoreError::NameTaken;
                }
                if constraint == id_constraint {
                    return StoreError::AlreadyExists;
                }
                return StoreError::AlreadyExists;
            }
        }
        StoreError::Database(err)
    }
}

/// A scoped transaction. Mutators on [`Store`] take `&mut StoreContext` and
/// fail `MissingContextTx` if handed one that was never `begin`'d — the type
/// itself enforces this by only being constructible via [`Store::begin`].
///
/// Dropping a context that was neither committed nor rolled back rolls the
/// underlying transaction back (via `sqlx::Transaction`'s own `Drop`), which
/// is exactly the behavior §5 requires on cancellation.
pub struct StoreContext {
    pub(crate) tx: Transaction<'static, Postgres>,
}

impl StoreContext {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(
        uri: &str,
        max_open: u32,
        max_idle: u32,
        max_lifetime: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_open)
            .min_connections(max_idle)
            .max_lifetime(max_lifetime)
            .connect(uri)
            .await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        info!("running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations completed");
        Ok(())
    }

    pub async fn begin(&self) -> Result<StoreContext, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(StoreContext { tx })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
