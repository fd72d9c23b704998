//! Engine error types

use thiserror::Error;

/// Errors produced by ingestion, mapping, delivery and storage
#[derive(Debug, Error)]
pub enum EngineError {
    /// Inbound payload is missing the customer identity or has unknown semantics.
    /// The event is rejected and never logged.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// No plan mapping exists for the product id. Recoverable: ingestion still
    /// records the event with an unresolved plan.
    #[error("No plan mapping for product '{product_id}'")]
    UnresolvedMapping { product_id: String },

    /// Destination URL failed validation; no request was sent
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("No delivery endpoint configured")]
    EndpointNotConfigured,

    #[error("Invalid plan mapping: {0}")]
    InvalidMapping(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
