// Service contracts and the ordered service registry

use crate::server::error::ServiceError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit the lifecycle coordinator initializes at startup
pub trait Service: Send + Sync {
    /// One-time initialization, called before any background task starts
    ///
    /// Must be idempotent.
    fn init(&self) -> Result<(), ServiceError>;

    /// The background capability of this service, if it has one
    fn background(self: Arc<Self>) -> Option<Arc<dyn BackgroundService>> {
        None
    }
}

/// A service with a long-running entry point
#[async_trait]
pub trait BackgroundService: Send + Sync {
    /// Run until `ctx` is cancelled or the service fails
    ///
    /// Called exactly once. Must return promptly after cancellation.
    async fn run(&self, ctx: CancellationToken) -> Result<(), ServiceError>;
}

/// Scheduling hint recorded alongside a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high"),
            Priority::Normal => f.write_str("normal"),
            Priority::Low => f.write_str("low"),
        }
    }
}

/// A registered service
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub priority: Priority,
    pub instance: Arc<dyn Service>,
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Ordered list of services, built explicitly at startup
#[derive(Default)]
pub struct Registry {
    services: Vec<ServiceDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service; registration order is initialization order
    pub fn register(
        &mut self,
        name: impl Into<String>,
        instance: Arc<dyn Service>,
        priority: Priority,
    ) -> &mut Self {
        let name = name.into();
        tracing::debug!("Registered service {} (priority {})", name, priority);
        self.services.push(ServiceDescriptor {
            name,
            priority,
            instance,
        });
        self
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn into_services(self) -> Vec<ServiceDescriptor> {
        self.services
    }
}
