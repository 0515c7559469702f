// HTTP listener: WebSocket upgrades under /ws, the static root document
// everywhere else

use crate::eval::Transform;
use crate::hub::broker::HubHandle;
use crate::hub::client::serve_connection;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

/// Request paths with this prefix are upgraded to WebSocket
pub const WS_PATH_PREFIX: &str = "/ws";

/// Largest inbound frame or message accepted from a client
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Everything a request handler needs
#[derive(Clone)]
pub struct HttpState {
    pub hub: HubHandle,
    pub transform: Arc<dyn Transform>,
    pub static_root: Arc<PathBuf>,
}

/// Bind the listening socket
pub fn bind(addr: SocketAddr) -> Result<AddrIncoming, hyper::Error> {
    AddrIncoming::bind(&addr)
}

/// Serve requests until `shutdown` fires
///
/// Upgraded connections are detached from the server and are closed by the
/// hub, not by this graceful shutdown.
pub async fn serve(
    incoming: AddrIncoming,
    state: HttpState,
    shutdown: CancellationToken,
) -> Result<(), hyper::Error> {
    let make_service = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone())))
        }
    });

    Server::builder(incoming)
        .serve(make_service)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn handle_request(req: Request<Body>, state: HttpState) -> Result<Response<Body>, Infallible> {
    if req.uri().path().starts_with(WS_PATH_PREFIX) {
        Ok(upgrade(req, state))
    } else {
        Ok(serve_static(&state.static_root).await)
    }
}

/// Whether the request asks for a WebSocket upgrade
pub fn is_websocket_request(req: &Request<Body>) -> bool {
    let upgrade = req
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

    let connection = req
        .headers()
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });

    req.method() == Method::GET && upgrade && connection
}

fn upgrade(mut req: Request<Body>, state: HttpState) -> Response<Body> {
    if !is_websocket_request(&req) {
        return plain(StatusCode::BAD_REQUEST, "expected a WebSocket upgrade");
    }

    let accept = match req.headers().get(header::SEC_WEBSOCKET_KEY) {
        Some(key) => derive_accept_key(key.as_bytes()),
        None => return plain(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key"),
    };

    let accept = match HeaderValue::from_str(&accept) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("Invalid accept key: {}", e);
            return plain(StatusCode::INTERNAL_SERVER_ERROR, "handshake failed");
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, Some(ws_config())).await;
                serve_connection(ws, state.hub, state.transform).await;
            }
            Err(e) => tracing::error!("New client connection failed: {}", e),
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(header::SEC_WEBSOCKET_ACCEPT, accept);
    response
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_MESSAGE_SIZE);
    config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    config
}

async fn serve_static(path: &Path) -> Response<Body> {
    match tokio::fs::read(path).await {
        Ok(contents) => {
            let mut response = Response::new(Body::from(contents));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Static document not found: {:?}", path);
            plain(StatusCode::NOT_FOUND, "not found")
        }
        Err(e) => {
            tracing::error!("Failed to read static document {:?}: {}", path, e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn plain(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}
