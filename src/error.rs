use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Delivery client cannot be constructed from the given configuration.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Evaluation context has a shape that cannot be exported as-is.
    #[error(transparent)]
    ContextExtraction(#[from] ContextExtractionError),
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    #[error("failed to serialize event envelope")]
    Serialization(#[source] Arc<serde_json::Error>),
    /// Ingestion endpoint could not be reached or rejected the request.
    #[error(transparent)]
    Transport(#[from] TransportError),
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    #[error(transparent)]
    Io(Arc<std::io::Error>),
    #[error("export worker thread panicked")]
    ExportWorkerPanicked,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(value))
    }
}

#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConfigurationError {
    #[error("no delivery stream name configured, set it explicitly or via FIREHOSE_STREAM_NAME")]
    MissingStreamName,
    #[error("invalid delivery stream name {0:?}")]
    InvalidStreamName(String),
    #[error("invalid endpoint_url configuration")]
    InvalidEndpoint(#[source] url::ParseError),
    #[error("unable to start delivery runtime: {0}")]
    Runtime(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContextExtractionError {
    #[error("context has no key attribute")]
    MissingKey,
    #[error("context key is not a string")]
    InvalidKey,
    #[error("context kind is not a string")]
    InvalidKind,
    #[error("multi-kind contexts are not supported")]
    MultiKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("ingestion service error {code}: {message}")]
    Service { code: String, message: String },
    #[error("ingestion endpoint responded with status {0}")]
    Status(u16),
    /// The transport did not produce a response for this record.
    #[error("ingestion endpoint unavailable")]
    Unavailable,
    #[error("export queue is full")]
    QueueFull,
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        match value.status() {
            Some(status) => TransportError::Status(status.as_u16()),
            None => TransportError::Network(value.without_url().to_string()),
        }
    }
}
