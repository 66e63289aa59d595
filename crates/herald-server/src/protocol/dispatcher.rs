//! Protocol dispatcher.
//!
//! Turns connection events into registry operations. Each connection moves
//! through `Connecting -> Open(session) -> Closed`; a session identifier is
//! minted on open, every message is checked against it, and close tears the
//! session down exactly once.

use std::sync::Arc;

use chrono::Utc;
use herald_core::{
    HeraldError, IdentifierPool, NotificationDraft, NotificationPatch, Result, SessionId,
};
use herald_registry::{Presenter, SessionRegistry, present_logged};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use super::envelope::{
    Action, CreatePayload, Envelope, Reply, TargetPayload, UpdatePayload, expiry_from_unix,
};
use crate::metrics::{ERROR_REPLIES_TOTAL, MESSAGES_DISPATCHED_TOTAL};

/// Lifecycle of one transport connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, no session yet.
    Connecting,
    /// Bound to a session.
    Open(SessionId),
    /// Torn down. Terminal.
    Closed,
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct Connection {
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// A connection that has not been opened yet.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Connecting),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Bound session, if open.
    pub fn session_id(&self) -> Option<SessionId> {
        match self.state() {
            ConnectionState::Open(id) => Some(id),
            _ => None,
        }
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes inbound envelopes to the registries and builds replies.
pub struct ProtocolDispatcher {
    sessions: Arc<SessionRegistry>,
    session_ids: IdentifierPool<SessionId>,
    presenter: Arc<dyn Presenter>,
}

impl ProtocolDispatcher {
    /// Dispatcher over `sessions` with room for `session_capacity` sessions.
    pub fn new(
        sessions: Arc<SessionRegistry>,
        session_capacity: usize,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            sessions,
            session_ids: IdentifierPool::new(session_capacity),
            presenter,
        }
    }

    /// Shared session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.session_ids.in_use()
    }

    /// Session identifier pool size.
    pub fn session_capacity(&self) -> usize {
        self.session_ids.capacity()
    }

    /// Mint a session for `conn` and register it.
    ///
    /// Only valid from `Connecting`. On failure the connection moves to
    /// `Closed` and nothing stays allocated.
    pub fn open(&self, conn: &Connection) -> Result<SessionId> {
        let mut state = conn.state.lock();
        if *state != ConnectionState::Connecting {
            return Err(HeraldError::Unauthorized(format!(
                "connection cannot be opened from {:?}",
                *state
            )));
        }

        let id = match self.session_ids.allocate() {
            Ok(id) => id,
            Err(e) => {
                *state = ConnectionState::Closed;
                warn!(error = %e, "refusing connection");
                return Err(e.into());
            }
        };
        if let Err(e) = self.sessions.add_session(id) {
            *state = ConnectionState::Closed;
            self.release(id);
            return Err(e);
        }
        *state = ConnectionState::Open(id);
        info!(session_id = %id, "session opened");
        Ok(id)
    }

    /// Tear down the session bound to `conn`.
    ///
    /// Safe to call any number of times; only the first call after `open`
    /// does anything. Returns the session that was closed.
    pub fn close(&self, conn: &Connection, code: Option<u16>, reason: &str) -> Option<SessionId> {
        let previous = std::mem::replace(&mut *conn.state.lock(), ConnectionState::Closed);
        let ConnectionState::Open(id) = previous else {
            debug!(?previous, "close on a connection with no open session");
            return None;
        };

        // A concurrent path may already have removed the session.
        let removed = self.sessions.remove_session(id).map(|ids| ids.len()).unwrap_or(0);
        self.release(id);
        info!(session_id = %id, ?code, reason, removed, "session closed");
        Some(id)
    }

    /// Handle one inbound text frame and build the reply.
    #[instrument(skip_all, fields(session_id, action))]
    pub async fn handle(&self, conn: &Connection, text: &str) -> Reply {
        let bound = conn.session_id();
        if let Some(id) = bound {
            let _ = tracing::Span::current().record("session_id", tracing::field::display(id));
        }

        let (reply, label) = match self.route(bound, text).await {
            Ok((session, action, payload)) => {
                (Reply::success(session, action, payload), action.as_str())
            }
            Err(Rejected { error, action }) => {
                counter!(ERROR_REPLIES_TOTAL, "code" => error.code()).increment(1);
                debug!(code = error.code(), reason = %error, "request rejected");
                let label = action
                    .as_deref()
                    .and_then(Action::parse)
                    .map_or("unknown", Action::as_str);
                (Reply::error(bound, action, &error), label)
            }
        };
        counter!(MESSAGES_DISPATCHED_TOTAL, "action" => label).increment(1);
        reply
    }

    async fn route(
        &self,
        bound: Option<SessionId>,
        text: &str,
    ) -> std::result::Result<(SessionId, Action, Value), Rejected> {
        let envelope = Envelope::decode(text).map_err(|(error, action)| Rejected { error, action })?;
        let raw_action = Some(envelope.action.clone());
        let _ = tracing::Span::current().record("action", envelope.action.as_str());
        let reject = |error: HeraldError| Rejected {
            error,
            action: raw_action.clone(),
        };

        let session = match (bound, SessionId::parse(&envelope.session_id)) {
            (Some(bound), Some(claimed)) if bound == claimed => bound,
            (None, _) => {
                return Err(reject(HeraldError::Unauthorized(
                    "connection has no open session".into(),
                )));
            }
            (Some(bound), _) => {
                return Err(reject(HeraldError::Unauthorized(format!(
                    "message claims session '{}' on a connection bound to session {bound}",
                    envelope.session_id
                ))));
            }
        };

        let action = Action::parse(&envelope.action)
            .ok_or_else(|| reject(HeraldError::UnknownAction(envelope.action.clone())))?;

        let payload = self
            .execute(session, action, &envelope)
            .await
            .map_err(reject)?;
        Ok((session, action, payload))
    }

    async fn execute(&self, session: SessionId, action: Action, envelope: &Envelope) -> Result<Value> {
        match action {
            Action::Create => {
                let p: CreatePayload = envelope.payload_as()?;
                let expires_at = p.expiry.map(expiry_from_unix).transpose()?;
                let draft = NotificationDraft {
                    title: p.title,
                    message: p.message,
                    source: p.source,
                    expires_at,
                };
                let record = self.sessions.create_notification(session, draft)?;
                present_logged(self.presenter.as_ref(), &record).await;
                Ok(to_value(&record))
            }
            Action::Update => {
                let p: UpdatePayload = envelope.payload_as()?;
                let patch = NotificationPatch {
                    title: p.title,
                    message: p.message,
                    expires_at: p.expiry.map(expiry_from_unix).transpose()?,
                };
                let record = self
                    .sessions
                    .update_notification(session, p.notification_id, patch)?;
                Ok(to_value(&record))
            }
            Action::Delete => {
                let p: TargetPayload = envelope.payload_as()?;
                let record = self.sessions.delete_notification(session, p.notification_id)?;
                Ok(json!({ "notificationID": record.id() }))
            }
            Action::Display => {
                let p: TargetPayload = envelope.payload_as()?;
                let record = self.sessions.get_notification(session, p.notification_id)?;
                present_logged(self.presenter.as_ref(), &record).await;
                Ok(to_value(&record))
            }
            Action::DisplayAll => {
                let records = self.sessions.list_notifications(session)?;
                for record in &records {
                    present_logged(self.presenter.as_ref(), record).await;
                }
                Ok(json!({ "count": records.len(), "notifications": records }))
            }
            Action::Ping => Ok(json!({
                "pong": true,
                "timestamp": Utc::now().to_rfc3339(),
                "echo": envelope.payload.clone().unwrap_or(Value::Null),
            })),
        }
    }

    fn release(&self, id: SessionId) {
        if let Err(e) = self.session_ids.free(id) {
            tracing::error!(session_id = %id, error = %e, "failed to free session identifier");
        }
    }
}

impl std::fmt::Debug for ProtocolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolDispatcher")
            .field("sessions", &self.sessions)
            .field("presenter", &self.presenter.name())
            .finish_non_exhaustive()
    }
}

struct Rejected {
    error: HeraldError,
    action: Option<String>,
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to serialize reply payload");
        Value::Null
    })
}
