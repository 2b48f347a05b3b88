//! Runtime error types.

use junction_core::MessagingError;
use junction_framework::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or validating configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured store could not be opened.
    #[error("Failed to open message store: {0}")]
    Store(#[from] StoreError),

    /// A component could not be built.
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    /// Installing a shutdown signal handler failed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),

    /// A component with this name is already registered.
    #[error("Component already registered: {0}")]
    ComponentExists(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
