//! Notification protocol: wire envelopes and the per-connection dispatcher.

pub mod dispatcher;
pub mod envelope;

pub use dispatcher::{Connection, ConnectionState, ProtocolDispatcher};
pub use envelope::{Action, CONNECT_ACTION, Envelope, Reply, ReplyStatus};
