use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No timestamp shard available: {0}")]
    AllocatorUnavailable(String),

    #[error("Primary unavailable: {0}")]
    PrimaryUnavailable(String),

    #[error("No eligible leader: {0}")]
    NoEligibleLeader(String),

    #[error("Promotion failed: {0}")]
    PromotionFailed(String),

    #[error("Rewire failed: {0}")]
    RewireFailed(String),

    #[error("No healthy quorum: {0}")]
    NoHealthyQuorum(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::AllocatorUnavailable(_) => "allocator_unavailable",
            Error::PrimaryUnavailable(_) => "primary_unavailable",
            Error::NoEligibleLeader(_) => "no_eligible_leader",
            Error::PromotionFailed(_) => "promotion_failed",
            Error::RewireFailed(_) => "rewire_failed",
            Error::NoHealthyQuorum(_) => "no_healthy_quorum",
            Error::InvalidStatement(_) => "invalid_statement",
            Error::ExecutionError(_) => "execution_error",
            Error::InstanceNotFound(_) => "instance_not_found",
            Error::Container(_) => "container",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Database(_) => "database",
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Toml(_) => "toml",
        }
    }

    /// Whether a database error looks like a lost or demoted primary:
    /// connection refused/reset, pool exhaustion against a dead host, or a
    /// write rejected because the server went read-only.
    pub fn indicates_primary_loss(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Io(_)) => true,
            Error::Database(sqlx::Error::PoolTimedOut) => true,
            Error::Database(sqlx::Error::PoolClosed) => true,
            Error::Database(sqlx::Error::Database(db)) => {
                // ER_OPTION_PREVENTS_STATEMENT: "running with the --read-only option"
                db.code().as_deref() == Some("1290")
                    || db.message().contains("read-only")
                    || db.message().contains("super-read-only")
            }
            Error::Database(sqlx::Error::Tls(_)) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_labels() {
        assert_eq!(
            Error::AllocatorUnavailable("x".into()).error_type(),
            "allocator_unavailable"
        );
        assert_eq!(
            Error::NoHealthyQuorum("x".into()).error_type(),
            "no_healthy_quorum"
        );
        assert_eq!(
            Error::InvalidStatement("x".into()).error_type(),
            "invalid_statement"
        );
    }

    #[test]
    fn test_io_errors_indicate_primary_loss() {
        let err = Error::Database(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(err.indicates_primary_loss());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).indicates_primary_loss());
    }

    #[test]
    fn test_plain_execution_error_is_not_primary_loss() {
        assert!(!Error::ExecutionError("syntax".into()).indicates_primary_loss());
        assert!(!Error::Database(sqlx::Error::RowNotFound).indicates_primary_loss());
    }
}
