//! # herald-server
//!
//! Notification protocol and its WebSocket transport.
//!
//! - [`protocol`]: envelope codec and the per-connection [`ProtocolDispatcher`]
//! - [`websocket`]: connection tracking, heartbeat, and the session loop
//! - HTTP endpoints: `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken` and a `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use protocol::ProtocolDispatcher;
pub use server::{HeraldServer, ServerError};
pub use shutdown::ShutdownCoordinator;
