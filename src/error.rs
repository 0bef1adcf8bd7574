//! Error types for harness construction and use.
//!
//! Construction-phase errors are fatal and propagate to the caller after
//! best-effort cleanup of whatever was already acquired. Teardown-phase
//! failures are never surfaced as errors; they are logged at warn level so
//! they cannot mask the outcome of the test that used the harness.

use std::time::Duration;

use thiserror::Error;

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can occur while constructing a harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The backing store did not accept connections within the startup bound.
    ///
    /// Not retried internally; the caller may retry harness construction.
    #[error("postgres container did not become ready within {timeout:?}: {reason}")]
    ProvisioningTimeout {
        /// Startup bound that was exceeded.
        timeout: Duration,
        /// Last observed probe failure.
        reason: String,
    },

    /// The container engine rejected a provisioning step (connect, pull,
    /// create, start).
    #[error("failed to provision postgres container: {reason}")]
    Provisioning {
        /// Reason for failure.
        reason: String,
    },

    /// The context factory could not produce an instance.
    #[error("failed to construct context: {0}")]
    ContextConstruction(#[source] ContextError),

    /// Schema materialization failed after the container was already up.
    #[error("schema initialization failed: {0}")]
    SchemaInit(#[source] ContextError),

    /// The service registration graph could not be satisfied.
    #[error("service registry build failed: {0}")]
    RegistryBuild(#[from] RegistryError),

    /// The blocking bridge could not create its runtime.
    #[error("failed to start bridge runtime: {0}")]
    Bridge(#[from] std::io::Error),
}

/// Errors raised by context implementations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Connection pool configuration or checkout failed.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// A query or DDL statement failed.
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

impl From<deadpool_postgres::PoolError> for ContextError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        ContextError::Pool(e.to_string())
    }
}

impl From<deadpool_postgres::CreatePoolError> for ContextError {
    fn from(e: deadpool_postgres::CreatePoolError) -> Self {
        ContextError::Pool(e.to_string())
    }
}

/// Errors raised when resolving services from a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested service kind was never registered.
    #[error("service '{service}' is not registered")]
    NotRegistered {
        /// Type name of the missing service.
        service: &'static str,
    },

    /// A registered factory failed while producing its service.
    #[error("factory for service '{service}' failed: {reason}")]
    FactoryFailed {
        /// Type name of the service being built.
        service: &'static str,
        /// Reason for failure.
        reason: String,
    },
}
