// The hub as a background service: hub loop plus HTTP listener

use crate::config::Config;
use crate::eval::Transform;
use crate::hub::broker::{Hub, HubHandle};
use crate::hub::http::{self, HttpState};
use crate::server::{BackgroundService, Service, ServiceError};
use anyhow::anyhow;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Runs the hub and serves WebSocket clients
pub struct HubService {
    configured_addr: SocketAddr,
    static_root: Arc<PathBuf>,
    transform: Arc<dyn Transform>,
    handle: HubHandle,
    hub: Mutex<Option<Hub>>,
    listen_addr: OnceLock<SocketAddr>,
    local_addr: watch::Sender<Option<SocketAddr>>,
}

impl HubService {
    pub fn new(config: &Config, transform: Arc<dyn Transform>) -> Self {
        let (hub, handle) = Hub::new(config.max_history, config.channel_capacity);
        let (local_addr, _) = watch::channel(None);

        Self {
            configured_addr: config.listen_addr(),
            static_root: Arc::new(config.static_root.clone()),
            transform,
            handle,
            hub: Mutex::new(Some(hub)),
            listen_addr: OnceLock::new(),
            local_addr,
        }
    }

    /// Handle for submitting events to this service's hub
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Address the listener is bound to, once `run` has bound it
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.borrow()
    }

    /// Wait until the listener is bound
    pub async fn bound(&self) -> SocketAddr {
        let mut rx = self.local_addr.subscribe();
        loop {
            if let Some(addr) = *rx.borrow_and_update() {
                return addr;
            }
            // the sender lives as long as self
            let _ = rx.changed().await;
        }
    }
}

impl Service for HubService {
    fn init(&self) -> Result<(), ServiceError> {
        let addr = *self.listen_addr.get_or_init(|| self.configured_addr);

        if !self.static_root.exists() {
            tracing::warn!("Static document {:?} does not exist", self.static_root);
        }

        tracing::debug!("Websocket service initialized for {}", addr);
        Ok(())
    }

    fn background(self: Arc<Self>) -> Option<Arc<dyn BackgroundService>> {
        Some(self)
    }
}

#[async_trait]
impl BackgroundService for HubService {
    async fn run(&self, ctx: CancellationToken) -> Result<(), ServiceError> {
        let addr = *self
            .listen_addr
            .get()
            .ok_or_else(|| ServiceError::Init("websocket service was not initialized".into()))?;

        let hub = self
            .hub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| ServiceError::Failed(anyhow!("websocket service is already running")))?;

        let incoming = match http::bind(addr) {
            Ok(incoming) => incoming,
            Err(e) => {
                // Walk the hub through its shutdown so its state reads Stopped
                let stop = CancellationToken::new();
                stop.cancel();
                hub.run(stop).await;
                return Err(ServiceError::Bind { addr, source: e });
            }
        };

        let local = incoming.local_addr();
        self.local_addr.send_replace(Some(local));
        tracing::info!("Websocket listening on {}", local);

        let hub_cancel = ctx.child_token();
        let state = HttpState {
            hub: self.handle.clone(),
            transform: self.transform.clone(),
            static_root: self.static_root.clone(),
        };

        let server = async {
            let result = http::serve(incoming, state, self.handle.stopped_token()).await;
            if result.is_err() {
                hub_cancel.cancel();
            }
            result
        };

        let ((), served) = tokio::join!(hub.run(hub_cancel.clone()), server);
        tracing::info!("Stopping websocket");

        served.map_err(|e| ServiceError::Failed(anyhow!("http server failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::ExpressionEvaluator;
    use crate::hub::HubState;
    use std::net::{IpAddr, Ipv4Addr};

    fn local_config() -> Config {
        Config {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_run_requires_init() {
        let service = HubService::new(&local_config(), Arc::new(ExpressionEvaluator::new()));
        let err = service.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Init(_)));
    }

    #[tokio::test]
    async fn test_run_binds_and_stops_on_cancel() {
        let service = Arc::new(HubService::new(
            &local_config(),
            Arc::new(ExpressionEvaluator::new()),
        ));
        service.init().unwrap();
        service.init().unwrap();

        let ctx = CancellationToken::new();
        let runner = service.clone();
        let run_ctx = ctx.clone();
        let task = tokio::spawn(async move { runner.run(run_ctx).await });

        let addr = service.bound().await;
        assert_ne!(addr.port(), 0);
        assert_eq!(service.local_addr(), Some(addr));

        ctx.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(service.handle().state(), HubState::Stopped);

        // the hub can only run once
        let err = service.run(CancellationToken::new()).await.unwrap_err();
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let config = Config {
            port,
            ..local_config()
        };
        let service = HubService::new(&config, Arc::new(ExpressionEvaluator::new()));
        service.init().unwrap();

        let err = service.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Bind { .. }));
        assert_eq!(service.handle().state(), HubState::Stopped);
    }
}
