use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::error::{is_retryable_deadlock, RepoError};

/// The ambient transaction handle threaded through every repository call.
/// `with_tx` detects reentry by checking which variant it was handed rather
/// than consulting a thread-local: a nested `with_tx` call receives
/// `TxContext::Tx` and reuses it instead of opening a second transaction.
pub enum TxContext {
    Pool(PgPool),
    Tx(Transaction<'static, Postgres>),
}

impl TxContext {
    pub fn pool(pool: PgPool) -> Self {
        TxContext::Pool(pool)
    }
}

pub async fn create_pool(dsn: &str, max_open: u32, max_idle: u32) -> Result<PgPool, RepoError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_open)
        .min_connections(max_idle)
        .connect(dsn)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), RepoError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Top-level repository handle: owns the pool, hands out fresh
/// `TxContext::Pool` handles to callers that aren't already inside a
/// transaction, and runs `with_tx` for callers that need several operations
/// to commit atomically.
#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A context bound to the pool, suitable for a single-statement call
    /// that doesn't need `with_tx`.
    pub fn ctx(&self) -> TxContext {
        TxContext::Pool(self.pool.clone())
    }

    /// Runs `f` against a transaction. If `ctx` already holds one (this call
    /// is nested inside an outer `with_tx`), reuses it and lets the outer
    /// call own the commit/rollback; otherwise opens a fresh transaction and
    /// commits on success, rolls back on error. The higher-ranked bound on
    /// `f` lets it run against either the caller's `ctx` or a freshly opened
    /// local one without the two needing the same lifetime.
    pub async fn with_tx<F, T>(&self, ctx: &mut TxContext, f: F) -> Result<T, RepoError>
    where
        F: for<'a> FnOnce(&'a mut TxContext) -> BoxFuture<'a, Result<T, RepoError>>,
    {
        match ctx {
            TxContext::Tx(_) => f(ctx).await,
            TxContext::Pool(_) => {
                let tx = self.pool.begin().await?;
                let mut owned = TxContext::Tx(tx);
                let result = f(&mut owned).await;
                match owned {
                    TxContext::Tx(tx) => {
                        if result.is_ok() {
                            tx.commit().await?;
                        } else {
                            let _ = tx.rollback().await;
                        }
                    }
                    TxContext::Pool(_) => unreachable!(),
                }
                result
            }
        }
    }
}

/// Retries `f` once if it fails with a Postgres deadlock/serialization
/// SQLSTATE; any other error, or a second failure, propagates. Every repo
/// write in `orders`/`outbound`/`ports`/`devices`/`cmd_log` goes through
/// this so the deadlock-retry policy applies uniformly rather than
/// per-caller.
pub(crate) async fn retry_once_on_deadlock<F, Fut, T>(mut f: F) -> Result<T, RepoError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepoError>>,
{
    match f().await {
        Err(RepoError::Sql(e)) if is_retryable_deadlock(&e) => {
            tracing::warn!(error = %e, "deadlock detected, retrying once");
            tokio::time::sleep(Duration::from_millis(50)).await;
            f().await
        }
        other => other,
    }
}
