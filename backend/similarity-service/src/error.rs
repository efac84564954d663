use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Process exit code for a fatal error (sysexits.h values).
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Configuration(_) => 78,
            AppError::Validation(_) => 64,
            _ => 1,
        }
    }

    /// Errors that only affect a single item of a batch.
    pub fn is_item_scoped(&self) -> bool {
        matches!(
            self,
            AppError::Provider(_) | AppError::DataIntegrity(_) | AppError::NotFound(_)
        )
    }
}

// Implement conversions from other error types
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Provider(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppError::Configuration("x".into()).exit_code(), 78);
        assert_eq!(AppError::Validation("x".into()).exit_code(), 64);
        assert_eq!(AppError::Database("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_item_scoped() {
        assert!(AppError::Provider("quota".into()).is_item_scoped());
        assert!(AppError::DataIntegrity("bad bytes".into()).is_item_scoped());
        assert!(!AppError::Database("down".into()).is_item_scoped());
    }
}
