//! Reconciler error types

use std::time::Duration;
use thiserror::Error;

/// Reconciler errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("no private ip for uhost {id}")]
    MissingAddress { id: String },

    #[error(
        "timed out after {elapsed:?} waiting for {operation}, still pending: {}",
        .pending.join(", ")
    )]
    Timeout {
        operation: String,
        elapsed: Duration,
        pending: Vec<String>,
    },

    #[error("do {operation} failed for {target}: {source}")]
    Remote {
        operation: String,
        target: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error(
        "apply stopped after {} completed step(s) ({}): {source}",
        .completed.len(),
        .completed.join("; ")
    )]
    PartialFailure {
        completed: Vec<String>,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Config error: {0}")]
    Config(#[from] ulbflow_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// Annotate a remote failure with the operation and its target.
    ///
    /// `NotFound` passes through untouched so callers can keep matching on it.
    pub fn remote(operation: impl Into<String>, target: impl Into<String>, source: Self) -> Self {
        if let Self::NotFound { .. } = source {
            return source;
        }
        Self::Remote {
            operation: operation.into(),
            target: target.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Remote { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
