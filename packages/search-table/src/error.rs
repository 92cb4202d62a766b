//! Error types for search-table

use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;

/// Table error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing configuration
    Config,
    /// Connection, TLS or protocol level failure talking to the backend
    Transport,
    /// A record could not be turned into a field document
    Serialization,
    /// No document identity could be derived for an update/delete
    MissingIdentity,
    /// No target index could be resolved for an operation
    IndexRouting,
    /// Index creation lost a race against another creator
    IndexAlreadyExists,
    /// Index creation failed for any other reason
    IndexCreation,
    /// Backend answered with a non-success status
    Backend,
    /// Table (or its bulk processor) has been destroyed
    Closed,
    /// Metrics registration failed
    Metrics,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Serialization => "serialization",
            ErrorKind::MissingIdentity => "missing_identity",
            ErrorKind::IndexRouting => "index_routing",
            ErrorKind::IndexAlreadyExists => "index_already_exists",
            ErrorKind::IndexCreation => "index_creation",
            ErrorKind::Backend => "backend",
            ErrorKind::Closed => "closed",
            ErrorKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Table error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct TableError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl TableError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn missing_identity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingIdentity, message)
    }

    pub fn index_routing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexRouting, message)
    }

    pub fn index_already_exists(index: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::IndexAlreadyExists,
            format!("Index already exists: {}", index.into()),
        )
    }

    pub fn index_creation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IndexCreation, message)
    }

    pub fn backend(status: u16, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Backend,
            format!("status {}: {}", status, reason.into()),
        )
    }

    pub fn closed(table_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Closed,
            format!("Table '{}' has been destroyed", table_id.into()),
        )
    }

    /// Whether a dispatch that failed with this error may succeed when resent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Transport | ErrorKind::Backend | ErrorKind::IndexCreation
        )
    }
}

impl From<serde_json::Error> for TableError {
    fn from(err: serde_json::Error) -> Self {
        TableError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<ConfigError> for TableError {
    fn from(err: ConfigError) -> Self {
        TableError::config(err.to_string()).with_source(err)
    }
}

impl From<prometheus::Error> for TableError {
    fn from(err: prometheus::Error) -> Self {
        TableError::new(ErrorKind::Metrics, format!("Metrics error: {}", err)).with_source(err)
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TableError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("Request timeout: {}", err)
        } else if err.is_connect() {
            format!("Failed to connect: {}", err)
        } else {
            format!("Request failed: {}", err)
        };
        TableError::transport(message).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TableError>;
