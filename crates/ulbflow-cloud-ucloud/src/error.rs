//! UCloud provider error types

use thiserror::Error;
use ulbflow_cloud::CloudError;

#[derive(Error, Debug)]
pub enum UCloudError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("UCloud API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ulbflow_config::ConfigError),
}

pub type Result<T> = std::result::Result<T, UCloudError>;

impl From<UCloudError> for CloudError {
    fn from(err: UCloudError) -> Self {
        match err {
            UCloudError::Api { code, message } => CloudError::Api { code, message },
            UCloudError::NotFound { kind, id } => CloudError::NotFound { kind, id },
            UCloudError::InvalidConfig(msg) => CloudError::InvalidConfig(msg),
            UCloudError::Config(e) => CloudError::Config(e),
            other => CloudError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_keeps_code() {
        let err: CloudError = UCloudError::Api {
            code: 230,
            message: "Params [ULBId] not available".to_string(),
        }
        .into();
        assert!(matches!(err, CloudError::Api { code: 230, .. }));
    }

    #[test]
    fn test_not_found_is_preserved() {
        let err: CloudError = UCloudError::NotFound {
            kind: "listener".to_string(),
            id: "vserver-1".to_string(),
        }
        .into();
        assert!(err.is_not_found());
    }
}
