//! WebSocket transport: connection tracking, heartbeat, and the per-client
//! session loop.

pub mod connection;
pub mod heartbeat;
pub mod manager;
pub mod session;
