// Lifecycle coordinator for registered services
//
// Initializes every service in registration order, runs the background ones
// concurrently under a shared cancellation token, and shuts them down
// together.

pub mod error;
pub mod service;

pub use error::{ServerError, ServiceError};
pub use service::{BackgroundService, Priority, Registry, Service, ServiceDescriptor};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// First failure reported by a background service
#[derive(Debug, Clone)]
struct Failure {
    service: String,
    error: Arc<ServiceError>,
}

/// State shared with the background tasks
#[derive(Default)]
struct Shared {
    shutdown_in_progress: AtomicBool,
    failure: Mutex<Option<Failure>>,
}

impl Shared {
    /// Keep the first failure only
    fn record_failure(&self, service: String, error: ServiceError) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(Failure {
                service,
                error: Arc::new(error),
            });
        }
    }

    fn failure(&self) -> Option<Failure> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Boots, runs and shuts down a set of services
pub struct Server {
    services: Vec<ServiceDescriptor>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    shared: Arc<Shared>,
    shutdown_reason: Mutex<Option<String>>,
}

impl Server {
    /// Create a coordinator for the given services
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self {
            services,
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
            shared: Arc::new(Shared::default()),
            shutdown_reason: Mutex::new(None),
        }
    }

    /// The context every background service runs under
    pub fn context(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn shutdown_in_progress(&self) -> bool {
        self.shared.shutdown_in_progress.load(Ordering::SeqCst)
    }

    pub fn shutdown_reason(&self) -> Option<String> {
        self.shutdown_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Initialize all services, then run the background ones until they stop
    ///
    /// An init failure aborts before any background task is spawned. Returns
    /// the first non-cancellation failure reported by a background service.
    pub async fn run(&self) -> Result<(), ServerError> {
        for descriptor in &self.services {
            tracing::debug!("Initializing service {}", descriptor.name);

            if let Err(e) = descriptor.instance.init() {
                tracing::error!("Starting services failed at {}: {}", descriptor.name, e);
                return Err(ServerError::Init {
                    service: descriptor.name.clone(),
                    source: e,
                });
            }
        }

        for descriptor in &self.services {
            let Some(service) = descriptor.instance.clone().background() else {
                continue;
            };

            let name = descriptor.name.clone();
            let ctx = self.cancel.clone();
            let shared = self.shared.clone();

            self.tasks.spawn(async move {
                if shared.shutdown_in_progress.load(Ordering::SeqCst) {
                    return;
                }

                tracing::info!("Starting service {}", name);

                // Run in a nested task so a panic is reported as a failure
                let run_ctx = ctx.clone();
                let result = match tokio::spawn(async move { service.run(run_ctx).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(ServiceError::Failed(anyhow::anyhow!(
                        "service task aborted: {}",
                        e
                    ))),
                };

                shared.shutdown_in_progress.store(true, Ordering::SeqCst);

                match result {
                    Ok(()) => tracing::info!("Stopped {}", name),
                    Err(e) if e.is_cancelled() => tracing::info!("Stopped {} (cancelled)", name),
                    Err(e) => {
                        tracing::error!("Stopped {}: {}", name, e);
                        shared.record_failure(name, e);
                        ctx.cancel();
                    }
                }
            });
        }

        self.tasks.close();

        tracing::debug!("Waiting on services...");
        self.tasks.wait().await;

        match self.shared.failure() {
            Some(failure) => {
                tracing::error!("A service failed: {}: {}", failure.service, failure.error);
                Err(ServerError::Service {
                    service: failure.service,
                    source: failure.error,
                })
            }
            None => Ok(()),
        }
    }

    /// Cancel every background service and wait for all of them to return
    ///
    /// A service failure observed while waiting is logged, not returned.
    pub async fn shutdown(&self, reason: &str) {
        tracing::info!("Shutdown started: {}", reason);

        *self
            .shutdown_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        self.shared.shutdown_in_progress.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        self.tasks.close();
        self.tasks.wait().await;

        if let Some(failure) = self.shared.failure() {
            tracing::error!(
                "Failed waiting for services to shutdown: {}: {}",
                failure.service,
                failure.error
            );
        }
    }

    /// Process exit code for the outcome of [`Server::run`]
    ///
    /// Zero only when nothing failed and the stop was requested through
    /// [`Server::shutdown`].
    pub fn exit_code(&self, result: &Result<(), ServerError>) -> i32 {
        match (result, self.shutdown_reason()) {
            (Ok(()), Some(reason)) => {
                tracing::info!("Server shutdown: {}", reason);
                0
            }
            (Ok(()), None) => {
                tracing::error!("Server shutdown: no services to listen");
                1
            }
            (Err(e), _) => {
                tracing::error!("Server shutdown: {}", e);
                1
            }
        }
    }
}
