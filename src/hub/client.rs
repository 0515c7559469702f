// Client connections: identity, outbound queue and the per-connection loops

use crate::eval::Transform;
use crate::hub::broker::{HubError, HubHandle};
use crate::hub::message::{Message, INVALID_EXPRESSION};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Error delivering a message to a client
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,

    #[error("connection is closed")]
    Closed,
}

/// A connected client
///
/// Cloned between the hub's client set and the connection's own task. The
/// outbound queue feeds the connection's write pump; cancelling `closed` is
/// the close notification.
#[derive(Clone)]
pub struct Client {
    id: ClientId,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl Client {
    /// Create a client whose close token is a child of `parent`
    pub fn new(capacity: usize, parent: &CancellationToken) -> (Self, mpsc::Receiver<Message>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let client = Self {
            id: ClientId::new(),
            outbound,
            closed: parent.child_token(),
        };
        (client, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Queue a message without waiting
    ///
    /// Used by the hub so one stalled connection cannot stall everyone else.
    pub fn deliver(&self, message: Message) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Queue a reply from the connection's own task, waiting for room
    pub async fn reply(&self, message: Message) -> Result<(), DeliveryError> {
        if self.closed.is_cancelled() {
            return Err(DeliveryError::Closed);
        }

        self.outbound
            .send(message)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Send the close notification; idempotent
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the client has been closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

/// Text broadcast for a successfully transformed payload
pub fn render_broadcast(payload: &str, result: &str) -> String {
    format!("{} = {}", payload, result)
}

/// Serve one upgraded WebSocket connection until it closes
///
/// Registers the client with the hub, runs the read loop and the write pump,
/// and on every exit path unregisters the client and releases the socket.
pub async fn serve_connection<S>(ws: S, hub: HubHandle, transform: Arc<dyn Transform>)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Sink<WsMessage, Error = WsError> + Send + 'static,
{
    let (client, outbound_rx) = hub.new_client();
    let id = client.id();
    let (sink, stream) = ws.split();

    let writer = tokio::spawn(write_pump(sink, outbound_rx, client.close_token()));

    if let Err(e) = hub.register(client.clone()).await {
        tracing::warn!("Client {} could not register: {}", id, e);
        client.close();
        drop(client);
        let _ = writer.await;
        return;
    }

    tracing::debug!("Client {} connected", id);

    // The read loop runs in its own task so a panic only ends this connection
    let reader = tokio::spawn(read_loop(stream, client.clone(), hub.clone(), transform));
    match reader.await {
        Ok(()) => {}
        Err(e) if e.is_panic() => tracing::error!("Panic recovered in client {}: {}", id, e),
        Err(e) => tracing::warn!("Client {} read loop aborted: {}", id, e),
    }

    if let Err(e) = hub.unregister(id).await {
        tracing::debug!("Client {} unregister skipped: {}", id, e);
    }

    client.close();
    drop(client);
    if let Err(e) = writer.await {
        tracing::warn!("Client {} write pump aborted: {}", id, e);
    }

    tracing::debug!("Client {} released", id);
}

/// Read frames until the connection ends or the client is closed
pub async fn read_loop<S>(
    mut stream: S,
    client: Client,
    hub: HubHandle,
    transform: Arc<dyn Transform>,
) where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = client.closed() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                if let Err(e) = handle_payload(&client, &hub, transform.as_ref(), text.as_str()).await {
                    tracing::debug!("Client {} stopped reading: {}", client.id(), e);
                    break;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            // Binary, ping and pong frames carry no payload for the hub
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                if is_normal_close(&e) {
                    tracing::debug!("Client {} closed the connection", client.id());
                } else {
                    tracing::error!("Unexpected error from client {}: {}", client.id(), e);
                }
                break;
            }
        }
    }
}

/// Transform one payload and either broadcast it or reply with a failure
async fn handle_payload(
    client: &Client,
    hub: &HubHandle,
    transform: &dyn Transform,
    payload: &str,
) -> Result<(), HubError> {
    match transform.apply(payload) {
        Ok(result) => hub.broadcast(render_broadcast(payload, &result)).await,
        Err(e) => {
            tracing::warn!("Expression evaluation failed for client {}: {}", client.id(), e);
            if let Err(e) = client.reply(Message::failure(INVALID_EXPRESSION)).await {
                tracing::debug!("Could not reply to client {}: {}", client.id(), e);
            }
            Ok(())
        }
    }
}

/// Drain the outbound queue into the socket
///
/// On close, flushes whatever is already queued, then sends a close frame.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<Message>, closed: CancellationToken)
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            message = rx.recv() => match message {
                Some(message) => {
                    if let Err(e) = send_message(&mut sink, &message).await {
                        if !is_normal_close(&e) {
                            tracing::warn!("Write failed: {}", e);
                        }
                        closed.cancel();
                        return;
                    }
                }
                None => break,
            },

            _ = closed.cancelled() => break,
        }
    }

    while let Ok(message) = rx.try_recv() {
        if send_message(&mut sink, &message).await.is_err() {
            break;
        }
    }

    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
}

async fn send_message<S>(sink: &mut S, message: &Message) -> Result<(), WsError>
where
    S: Sink<WsMessage, Error = WsError> + Unpin,
{
    match message.to_json() {
        Ok(json) => sink.send(WsMessage::Text(json.into())).await,
        Err(e) => {
            tracing::error!("Failed to encode message: {}", e);
            Ok(())
        }
    }
}

fn is_normal_close(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
