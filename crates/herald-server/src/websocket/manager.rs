//! Live connection tracking.

use std::collections::HashMap;
use std::sync::Arc;

use herald_core::SessionId;
use tokio::sync::RwLock;
use tracing::debug;

use super::connection::{ClientConnection, CloseReason};

/// Connected clients indexed by their session.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<SessionId, Arc<ClientConnection>>>,
}

impl ConnectionManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    pub async fn add(&self, connection: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.session_id(), connection);
    }

    /// Stop tracking the connection for `session_id`.
    pub async fn remove(&self, session_id: SessionId) -> Option<Arc<ClientConnection>> {
        self.connections.write().await.remove(&session_id)
    }

    /// Connection bound to `session_id`, if any.
    pub async fn get(&self, session_id: SessionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(&session_id).cloned()
    }

    /// Number of tracked connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Ask every tracked connection to close with `reason`.
    ///
    /// Connections stay tracked until their own session loop removes them.
    pub async fn close_all(&self, reason: &CloseReason) -> usize {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            conn.close(reason.clone());
        }
        debug!(count = conns.len(), code = reason.code, "closing all connections");
        conns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::websocket::connection::Outbound;

    fn make_connection(id: u32) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = ClientConnection::new(SessionId::from(id), tx, CancellationToken::new());
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn add_get_remove() {
        let mgr = ConnectionManager::new();
        let (c0, _r0) = make_connection(0);
        let (c1, _r1) = make_connection(1);
        mgr.add(c0).await;
        mgr.add(c1).await;
        assert_eq!(mgr.connection_count().await, 2);
        assert!(mgr.get(SessionId::from(1)).await.is_some());

        assert!(mgr.remove(SessionId::from(0)).await.is_some());
        assert!(mgr.remove(SessionId::from(0)).await.is_none());
        assert_eq!(mgr.connection_count().await, 1);
    }

    #[tokio::test]
    async fn close_all_signals_every_connection() {
        let mgr = ConnectionManager::new();
        let (c0, _r0) = make_connection(0);
        let (c1, _r1) = make_connection(1);
        mgr.add(Arc::clone(&c0)).await;
        mgr.add(Arc::clone(&c1)).await;

        assert_eq!(mgr.close_all(&CloseReason::going_away()).await, 2);
        assert!(c0.is_closing());
        assert!(c1.is_closing());
        assert_eq!(mgr.connection_count().await, 2);
    }

    #[tokio::test]
    async fn empty_manager() {
        let mgr = ConnectionManager::default();
        assert_eq!(mgr.connection_count().await, 0);
        assert_eq!(mgr.close_all(&CloseReason::going_away()).await, 0);
    }
}
