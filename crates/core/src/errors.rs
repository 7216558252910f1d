use thiserror::Error;

/// Control-plane error taxonomy.
#[derive(Debug, Error)]
pub enum RunplaneError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation timed out: {0}")]
    OperationTimeout(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Application-level error response from the project leader, carrying
    /// whatever error context the leader attached to the response body.
    #[error("leader API error: status={status} ctx={ctx:?} errors={errors:?}")]
    LeaderApi {
        status: u16,
        ctx: Option<String>,
        errors: Vec<String>,
    },

    #[error("http transport error: {0}")]
    Http(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type RunplaneResult<T> = std::result::Result<T, RunplaneError>;
