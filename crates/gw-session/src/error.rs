use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("redis backend error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis connection pool error: {0}")]
    Pool(#[from] bb8::RunError<redis::RedisError>),

    #[error("failed to (de)serialize session record: {0}")]
    Codec(#[from] serde_json::Error),
}
