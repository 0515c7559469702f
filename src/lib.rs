//! wshub - Real-time expression hub over WebSocket
//!
//! Clients connect over WebSocket, send expressions, and receive every
//! successfully evaluated expression together with a bounded replay of recent
//! broadcasts. A single hub actor owns all shared state; a lifecycle
//! coordinator starts and stops it alongside any other registered service.

pub mod cli;
pub mod config;
pub mod eval;
pub mod hub;
pub mod logging;
pub mod server;

pub use config::{Config, Mode};
pub use eval::{ExpressionEvaluator, Transform, TransformError};
pub use hub::{Hub, HubHandle, HubService, Message};
pub use server::{Priority, Registry, Server, ServerError, ServiceError};
