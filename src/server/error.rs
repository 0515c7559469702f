// Error types for services and the lifecycle coordinator

use std::net::SocketAddr;
use std::sync::Arc;

/// Errors returned by a service's `init` or `run`
///
/// [`ServiceError::Cancelled`] marks a service that stopped because its
/// context was cancelled; every other variant is a real failure.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("cancelled")]
    Cancelled,

    #[error("initialization failed: {0}")]
    Init(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ServiceError {
    /// Whether this error only reports cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }
}

/// Errors returned by [`crate::server::Server::run`]
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("service {service} failed to initialize: {source}")]
    Init {
        service: String,
        #[source]
        source: ServiceError,
    },

    #[error("service {service} failed: {source}")]
    Service {
        service: String,
        #[source]
        source: Arc<ServiceError>,
    },
}
