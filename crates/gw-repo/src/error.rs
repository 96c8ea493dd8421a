use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("row not found")]
    NotFound,
}

/// Postgres SQLSTATE codes the repository retries once before giving up,
/// per the deadlock-retry policy.
pub(crate) fn is_retryable_deadlock(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(db_err.code().as_deref(), Some("40P01") | Some("40001")),
        _ => false,
    }
}
