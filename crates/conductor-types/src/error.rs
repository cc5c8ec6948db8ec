use thiserror::Error;

/// Errors from workflow Dao implementations (used by trait definitions in conductor-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("workflow not found at '{0}'")]
    NotFound(String),

    #[error("invalid location: {0}")]
    InvalidLocation(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::NotFound("mem://repo/deploy".to_string());
        assert_eq!(err.to_string(), "workflow not found at 'mem://repo/deploy'");
    }

    #[test]
    fn test_decode_error_display() {
        let err = RepositoryError::Decode("missing field `name`".to_string());
        assert!(err.to_string().contains("missing field"));
    }
}
