//! Error types for port operations.

/// Storage operation errors with context for debugging.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A backend operation ran before the backend finished its connection setup.
    #[error("{backend} backend not ready: connection setup has not completed")]
    BackendNotReady { backend: &'static str },

    /// Connection setup or liveness probe failed.
    #[error("{backend} connection failed: {message}")]
    Connection {
        backend: &'static str,
        message: String,
    },

    /// Database operation failed - includes operation name for tracing.
    #[error("Database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Bringing up the two-tier store failed. The next attempt starts from scratch.
    #[error("Failed to set up storage cluster: {0}")]
    ClusterSetupFailed(#[source] Box<StoreError>),
}

impl StoreError {
    pub fn not_ready(backend: &'static str) -> Self {
        Self::BackendNotReady { backend }
    }

    pub fn connection(backend: &'static str, message: impl ToString) -> Self {
        Self::Connection {
            backend,
            message: message.to_string(),
        }
    }

    /// Create a Database error with operation context.
    pub fn database(operation: &'static str, message: impl ToString) -> Self {
        Self::Database {
            operation,
            message: message.to_string(),
        }
    }

    /// Create a Serialization error.
    pub fn serialization(message: impl ToString) -> Self {
        Self::Serialization(message.to_string())
    }

    pub fn cluster_setup(cause: StoreError) -> Self {
        Self::ClusterSetupFailed(Box::new(cause))
    }

    /// Check if this is a BackendNotReady error.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::BackendNotReady { .. })
    }
}
