use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnError {
    #[error("protocol detection timed out")]
    DetectTimeout,

    #[error("unrecognized protocol magic during detection")]
    UnrecognizedProtocol,

    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    #[error("write error: {0}")]
    Write(#[source] std::io::Error),

    #[error("write queue full, connection is being closed")]
    WriteQueueFull,

    #[error("too many consecutive decode errors ({0})")]
    TooManyDecodeErrors(u32),

    #[error("session store error: {0}")]
    SessionStore(#[from] gw_session::SessionStoreError),

    #[error("repository error: {0}")]
    Repo(#[from] gw_repo::RepoError),
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("repository error: {0}")]
    Repo(#[from] gw_repo::RepoError),

    #[error("session store error: {0}")]
    SessionStore(#[from] gw_session::SessionStoreError),

    #[error("queue depth above high watermark, rejecting low-priority enqueue")]
    Overloaded,

    #[error("device {0} has no owning connection on this instance")]
    NotOwned(String),
}
