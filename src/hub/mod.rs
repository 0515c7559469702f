// Real-time message hub
//
// A single `Hub` actor owns the connected clients and the broadcast history.
// Connections talk to it only through a `HubHandle`; `HubService` runs the
// hub and its HTTP/WebSocket listener under the lifecycle coordinator.

pub mod broker;
pub mod client;
pub mod history;
pub mod http;
pub mod message;
pub mod service;

pub use broker::{
    Hub, HubError, HubHandle, HubState, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_HISTORY,
    OUTBOUND_HEADROOM,
};
pub use client::{read_loop, render_broadcast, serve_connection, Client, ClientId, DeliveryError};
pub use history::History;
pub use message::{Message, INVALID_EXPRESSION};
pub use service::HubService;
