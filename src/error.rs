//! Error types for kuredhorn
//!
//! Provides structured error types for the reconciler, the cluster
//! adapters, and process startup.

use thiserror::Error;

/// Unified error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    /// A write against one specific resource failed
    #[error("Failed to {operation} {kind}/{name}: {reason}")]
    ResourceOperationFailed {
        kind: String,
        name: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// What a reconciliation pass should do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Stop the pass and propagate the error to the driver
    AbortPass,
    /// The failure is confined to one resource; the pass may move on
    SkipResource,
}

impl Error {
    /// Wrap a failed write against a single resource
    pub fn resource_operation(
        operation: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        source: Error,
    ) -> Self {
        Error::ResourceOperationFailed {
            kind: kind.into(),
            name: name.into(),
            operation: operation.into(),
            reason: source.to_string(),
        }
    }

    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::ResourceOperationFailed { .. } => ErrorAction::SkipResource,

            // Reads, lists, and startup failures leave the pass without a
            // trustworthy view of the cluster
            _ => ErrorAction::AbortPass,
        }
    }

    /// Check if this error comes from the cluster API and may clear on its own
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(response)) => response.code >= 500 || response.code == 429,
            // Connection level failures
            Error::Kube(kube::Error::HyperError(_) | kube::Error::Service(_)) => true,
            _ => false,
        }
    }
}

/// Result type alias for the reconciler
pub type Result<T> = std::result::Result<T, Error>;
