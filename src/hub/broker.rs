// Hub actor: the only owner of the client set and broadcast history
//
// Every mutation arrives as an event on one of three bounded channels and is
// applied by `Hub::run`, one event at a time. A full channel blocks the
// sender, so a stalled hub applies backpressure to every read loop.
//
// Cancellation always wins. Among the three event channels the loop picks
// fairly, so a stream of broadcasts cannot starve unregistrations. A client
// whose own broadcast is applied before its registration still receives it,
// through the history replay.

use crate::hub::client::{Client, ClientId};
use crate::hub::history::History;
use crate::hub::message::Message;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Default capacity of the register, unregister and broadcast channels
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default number of broadcasts replayed to new clients
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Outbound queue slots per client beyond the history replay
pub const OUTBOUND_HEADROOM: usize = 64;

/// Lifecycle of the hub's control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Running,
    ShuttingDown,
    Stopped,
}

/// Errors submitting events to the hub
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub is stopped")]
    Stopped,
}

/// Handle for submitting events to the hub
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Client>,
    unregister_tx: mpsc::Sender<ClientId>,
    broadcast_tx: mpsc::Sender<String>,
    stopped: CancellationToken,
    state: watch::Receiver<HubState>,
    outbound_capacity: usize,
}

impl HubHandle {
    /// Create a client for a newly accepted connection
    ///
    /// The client's outbound queue can hold a full history replay, and it is
    /// closed automatically once the hub stops.
    pub fn new_client(&self) -> (Client, mpsc::Receiver<Message>) {
        Client::new(self.outbound_capacity, &self.stopped)
    }

    /// Add a client and replay the history to it
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Remove a client; unknown ids are ignored
    pub async fn unregister(&self, id: ClientId) -> Result<(), HubError> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| HubError::Stopped)
    }

    /// Record a payload in the history and deliver it to every client
    pub async fn broadcast(&self, text: impl Into<String>) -> Result<(), HubError> {
        self.broadcast_tx
            .send(text.into())
            .await
            .map_err(|_| HubError::Stopped)
    }

    pub fn state(&self) -> HubState {
        *self.state.borrow()
    }

    /// Wait until the hub reaches `state`
    ///
    /// Returns immediately if it already has.
    pub async fn wait_for_state(&self, state: HubState) {
        let mut rx = self.state.clone();
        let _ = rx.wait_for(|current| *current == state).await;
    }

    /// Token cancelled once the hub has closed its clients and stopped
    ///
    /// The HTTP listener stops accepting connections when this fires.
    pub fn stopped_token(&self) -> CancellationToken {
        self.stopped.clone()
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }
}

enum Event {
    Register(Client),
    Broadcast(String),
    Unregister(ClientId),
}

/// Next event from whichever channel is ready, chosen at random when several are
async fn next_event(
    register_rx: &mut mpsc::Receiver<Client>,
    broadcast_rx: &mut mpsc::Receiver<String>,
    unregister_rx: &mut mpsc::Receiver<ClientId>,
) -> Option<Event> {
    tokio::select! {
        Some(client) = register_rx.recv() => Some(Event::Register(client)),
        Some(text) = broadcast_rx.recv() => Some(Event::Broadcast(text)),
        Some(id) = unregister_rx.recv() => Some(Event::Unregister(id)),
        else => None,
    }
}

/// The hub actor
pub struct Hub {
    clients: HashMap<ClientId, Client>,
    history: History,
    register_rx: mpsc::Receiver<Client>,
    unregister_rx: mpsc::Receiver<ClientId>,
    broadcast_rx: mpsc::Receiver<String>,
    stopped: CancellationToken,
    state: watch::Sender<HubState>,
}

impl Hub {
    /// Create a hub and the handle used to talk to it
    pub fn new(max_history: usize, channel_capacity: usize) -> (Self, HubHandle) {
        let capacity = channel_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(HubState::Running);
        let stopped = CancellationToken::new();

        let hub = Self {
            clients: HashMap::new(),
            history: History::new(max_history),
            register_rx,
            unregister_rx,
            broadcast_rx,
            stopped: stopped.clone(),
            state: state_tx,
        };

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stopped,
            state: state_rx,
            outbound_capacity: max_history + OUTBOUND_HEADROOM,
        };

        (hub, handle)
    }

    /// Run the control loop until `cancel` fires
    ///
    /// On cancellation every registered client is closed and removed, the
    /// stopped token is cancelled, and the loop returns.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            "Hub started (history depth {})",
            self.history.capacity()
        );

        loop {
            let event = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                event = next_event(
                    &mut self.register_rx,
                    &mut self.broadcast_rx,
                    &mut self.unregister_rx,
                ) => event,
            };

            match event {
                Some(Event::Register(client)) => self.register(client),
                Some(Event::Broadcast(text)) => self.broadcast(text),
                Some(Event::Unregister(id)) => self.unregister(id),
                // Every handle is gone; only cancellation ends the loop now
                None => {
                    cancel.cancelled().await;
                    break;
                }
            }
        }

        self.shutdown();
    }

    fn register(&mut self, client: Client) {
        let id = client.id();

        for payload in self.history.iter() {
            if let Err(e) = client.deliver(Message::broadcast(payload)) {
                tracing::warn!("Failed to replay history to client {}: {}", id, e);
                client.close();
                return;
            }
        }

        self.clients.insert(id, client);
        tracing::info!(
            "Client {} registered ({} connected, {} replayed)",
            id,
            self.clients.len(),
            self.history.len()
        );
    }

    fn unregister(&mut self, id: ClientId) {
        match self.clients.remove(&id) {
            Some(client) => {
                client.close();
                tracing::info!(
                    "Client {} unregistered ({} connected)",
                    id,
                    self.clients.len()
                );
            }
            None => tracing::debug!("Client {} was not registered", id),
        }
    }

    fn broadcast(&mut self, text: String) {
        self.history.push(text.clone());

        let message = Message::broadcast(text);
        let mut failed = Vec::new();

        for (id, client) in self.clients.iter() {
            if let Err(e) = client.deliver(message.clone()) {
                tracing::error!("Failed to broadcast to client {}: {}", id, e);
                failed.push(*id);
            }
        }

        for id in failed {
            if let Some(client) = self.clients.remove(&id) {
                client.close();
                tracing::info!("Removed failed client {}", id);
            }
        }
    }

    fn shutdown(mut self) {
        self.state.send_replace(HubState::ShuttingDown);
        tracing::info!("Stopping hub, closing {} clients", self.clients.len());

        for (_, client) in self.clients.drain() {
            client.close();
        }

        // Later submissions fail with HubError::Stopped
        self.register_rx.close();
        self.unregister_rx.close();
        self.broadcast_rx.close();

        self.stopped.cancel();
        self.state.send_replace(HubState::Stopped);
        tracing::info!("Hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv_text(rx: &mut mpsc::Receiver<Message>) -> String {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbound queue closed")
            .text
    }

    /// Return once `rx`'s client has been applied by the hub
    ///
    /// A marker broadcast reaches the client either live or through the
    /// replay, and only after its registration.
    async fn wait_registered(handle: &HubHandle, rx: &mut mpsc::Receiver<Message>) {
        handle.broadcast("ready").await.unwrap();
        while recv_text(rx).await != "ready" {}
    }

    #[tokio::test]
    async fn test_register_replays_history_in_order() {
        let (hub, handle) = Hub::new(3, 16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));

        // The observer seeing "d" proves every broadcast has been applied
        let (observer, mut observer_rx) = handle.new_client();
        handle.register(observer).await.unwrap();
        wait_registered(&handle, &mut observer_rx).await;
        for payload in ["a", "b", "c", "d"] {
            handle.broadcast(payload).await.unwrap();
        }
        for expected in ["a", "b", "c", "d"] {
            assert_eq!(recv_text(&mut observer_rx).await, expected);
        }

        let (client, mut rx) = handle.new_client();
        handle.register(client).await.unwrap();

        assert_eq!(recv_text(&mut rx).await, "b");
        assert_eq!(recv_text(&mut rx).await, "c");
        assert_eq!(recv_text(&mut rx).await, "d");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_unknown_client_is_noop() {
        let (hub, handle) = Hub::new(3, 16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));

        handle.unregister(ClientId::new()).await.unwrap();

        let (client, mut rx) = handle.new_client();
        handle.register(client).await.unwrap();
        handle.broadcast("still running").await.unwrap();
        assert_eq!(recv_text(&mut rx).await, "still running");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_closes_client() {
        let (hub, handle) = Hub::new(3, 16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));

        let (client, mut rx) = handle.new_client();
        let observer = client.clone();
        handle.register(client).await.unwrap();
        wait_registered(&handle, &mut rx).await;
        handle.unregister(observer.id()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), observer.closed())
            .await
            .expect("client was not closed");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_closes_clients_and_stops() {
        let (hub, handle) = Hub::new(3, 16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));

        let (client, _rx) = handle.new_client();
        let observer = client.clone();
        handle.register(client).await.unwrap();
        handle.broadcast("before").await.unwrap();

        cancel.cancel();
        task.await.unwrap();

        assert!(observer.is_closed());
        assert!(handle.stopped_token().is_cancelled());
        assert_eq!(handle.state(), HubState::Stopped);
        assert!(matches!(handle.broadcast("after").await, Err(HubError::Stopped)));

        let (late, _late_rx) = handle.new_client();
        assert!(late.is_closed());
        assert!(matches!(handle.register(late).await, Err(HubError::Stopped)));
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_others() {
        let (hub, handle) = Hub::new(3, 16);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));

        let (first, mut first_rx) = handle.new_client();
        let (middle, mut middle_rx) = handle.new_client();
        let (last, mut last_rx) = handle.new_client();
        let middle_observer = middle.clone();

        handle.register(first).await.unwrap();
        handle.register(middle).await.unwrap();
        handle.register(last).await.unwrap();
        handle.broadcast("ready").await.unwrap();
        for rx in [&mut first_rx, &mut middle_rx, &mut last_rx] {
            while recv_text(rx).await != "ready" {}
        }

        // The middle client's connection has gone away
        drop(middle_rx);
        handle.broadcast("hello").await.unwrap();

        assert_eq!(recv_text(&mut first_rx).await, "hello");
        assert_eq!(recv_text(&mut last_rx).await, "hello");
        assert!(middle_observer.is_closed());

        // Removed, so the next broadcast skips it quietly
        handle.broadcast("again").await.unwrap();
        assert_eq!(recv_text(&mut first_rx).await, "again");
        assert_eq!(recv_text(&mut last_rx).await, "again");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unregister_not_starved_by_broadcasts() {
        let backlog = 64;
        let (hub, handle) = Hub::new(0, backlog);

        // Queue everything before the loop starts so all channels are ready
        let (client, mut rx) = handle.new_client();
        let observer = client.clone();
        handle.register(client).await.unwrap();
        for i in 0..backlog {
            handle.broadcast(i.to_string()).await.unwrap();
        }
        handle.unregister(observer.id()).await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(hub.run(cancel.clone()));

        tokio::time::timeout(Duration::from_secs(1), observer.closed())
            .await
            .expect("client was not closed");

        // Strict channel priority would deliver the whole backlog first
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert!(delivered < backlog);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_outbound_capacity_covers_history() {
        let (_hub, handle) = Hub::new(10, 16);
        assert_eq!(handle.outbound_capacity(), 10 + OUTBOUND_HEADROOM);
        assert_eq!(handle.state(), HubState::Running);
    }
}
