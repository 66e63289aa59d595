//! Session ownership.
//!
//! [`SessionRegistry`] maps each live session to the set of notification
//! identifiers it owns, and is the only path through which sessions touch
//! notifications. Every operation that checks ownership and then acts does
//! both under one acquisition of the session lock, so a session teardown can
//! never interleave between the authorization check and the mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use herald_core::{
    HeraldError, NotificationDraft, NotificationId, NotificationPatch, NotificationRecord, Result,
    SessionId,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::metrics::SESSIONS_ACTIVE;
use crate::notifications::NotificationRegistry;

type OwnedSet = HashSet<NotificationId>;

/// Live sessions and the notifications each one owns.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, OwnedSet>>,
    notifications: Arc<NotificationRegistry>,
}

impl SessionRegistry {
    /// Wrap a notification registry.
    pub fn new(notifications: Arc<NotificationRegistry>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            notifications,
        }
    }

    /// The underlying notification registry.
    pub fn notifications(&self) -> &Arc<NotificationRegistry> {
        &self.notifications
    }

    /// Register a session with an empty owned set.
    pub fn add_session(&self, id: SessionId) -> Result<()> {
        let count = {
            let mut sessions = self.sessions.write();
            if sessions.contains_key(&id) {
                return Err(HeraldError::DuplicateSession(id));
            }
            let _ = sessions.insert(id, OwnedSet::new());
            sessions.len()
        };
        record_sessions(count);
        info!(session_id = %id, "session registered");
        Ok(())
    }

    /// Remove a session and every notification it owns.
    ///
    /// Returns the identifiers that were removed. An unknown session is
    /// logged and reported as [`HeraldError::UnknownSession`]; close paths
    /// may race and callers are free to ignore it.
    pub fn remove_session(&self, id: SessionId) -> Result<Vec<NotificationId>> {
        let mut sessions = self.sessions.write();
        let Some(owned) = sessions.remove(&id) else {
            drop(sessions);
            warn!(session_id = %id, "remove for unknown session");
            return Err(HeraldError::UnknownSession(id));
        };

        let mut removed: Vec<_> = owned.into_iter().collect();
        removed.sort_unstable();
        for notification_id in &removed {
            if let Err(e) = self.notifications.delete(*notification_id) {
                error!(
                    session_id = %id,
                    notification_id = %notification_id,
                    error = %e,
                    "owned set referenced a notification the registry does not hold"
                );
            }
        }
        let count = sessions.len();
        drop(sessions);

        record_sessions(count);
        info!(session_id = %id, removed = removed.len(), "session removed");
        Ok(removed)
    }

    /// Whether the session exists.
    pub fn contains_session(&self, id: SessionId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// True iff `session` exists and owns `notification`.
    pub fn is_authorized(&self, session: SessionId, notification: NotificationId) -> bool {
        self.sessions
            .read()
            .get(&session)
            .is_some_and(|owned| owned.contains(&notification))
    }

    /// Create a notification owned by `session`.
    pub fn create_notification(
        &self,
        session: SessionId,
        draft: NotificationDraft,
    ) -> Result<NotificationRecord> {
        let mut sessions = self.sessions.write();
        let owned = sessions
            .get_mut(&session)
            .ok_or(HeraldError::UnknownSession(session))?;
        let record = self.notifications.create(session, draft, Utc::now())?;
        let _ = owned.insert(record.id());
        Ok(record)
    }

    /// Update a notification `session` owns.
    pub fn update_notification(
        &self,
        session: SessionId,
        id: NotificationId,
        patch: NotificationPatch,
    ) -> Result<NotificationRecord> {
        let sessions = self.sessions.read();
        self.authorize(&sessions, session, id)?;
        self.notifications.update(id, patch)
    }

    /// Delete a notification `session` owns.
    pub fn delete_notification(
        &self,
        session: SessionId,
        id: NotificationId,
    ) -> Result<NotificationRecord> {
        let mut sessions = self.sessions.write();
        self.authorize(&sessions, session, id)?;
        if let Some(owned) = sessions.get_mut(&session) {
            let _ = owned.remove(&id);
        }
        self.notifications.delete(id).inspect_err(|e| {
            error!(
                session_id = %session,
                notification_id = %id,
                error = %e,
                "authorized notification missing from registry"
            );
        })
    }

    /// Snapshot of one notification `session` owns.
    pub fn get_notification(
        &self,
        session: SessionId,
        id: NotificationId,
    ) -> Result<NotificationRecord> {
        let sessions = self.sessions.read();
        self.authorize(&sessions, session, id)?;
        self.notifications.get(id)
    }

    /// Snapshot of every notification `session` owns, ordered by identifier.
    pub fn list_notifications(&self, session: SessionId) -> Result<Vec<NotificationRecord>> {
        let sessions = self.sessions.read();
        if !sessions.contains_key(&session) {
            return Err(HeraldError::UnknownSession(session));
        }
        Ok(self.notifications.list_by_session(session))
    }

    /// Evict `id` if its deadline is at or before `now`.
    ///
    /// The owner's set is updated before the record is removed and its
    /// identifier freed, same as an explicit delete.
    pub fn evict_expired(&self, id: NotificationId, now: DateTime<Utc>) -> Option<NotificationRecord> {
        let mut sessions = self.sessions.write();
        let owner = match self.notifications.get(id) {
            Ok(record) if record.is_due(now) => record.session_id(),
            Ok(_) => return None,
            // Let the registry drop a dangling index entry.
            Err(_) => return self.notifications.expire(id, now),
        };
        if !sessions.get_mut(&owner).is_some_and(|owned| owned.remove(&id)) {
            error!(
                session_id = %owner,
                notification_id = %id,
                "expiring notification was not in its owner's set"
            );
        }
        let record = self.notifications.expire(id, now);
        drop(sessions);

        if record.is_some() {
            debug!(session_id = %owner, notification_id = %id, "notification expired");
        }
        record
    }

    /// Ownership gate. Distinguishes a notification that is not live at all
    /// (`NotFound`) from one that belongs to someone else (`Unauthorized`).
    fn authorize(
        &self,
        sessions: &HashMap<SessionId, OwnedSet>,
        session: SessionId,
        id: NotificationId,
    ) -> Result<()> {
        let owned = sessions
            .get(&session)
            .ok_or(HeraldError::UnknownSession(session))?;
        if owned.contains(&id) {
            return Ok(());
        }
        if self.notifications.contains(id) {
            Err(HeraldError::not_owner(session, &id.to_string()))
        } else {
            Err(HeraldError::NotFound(id))
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .field("notifications", &self.notifications)
            .finish()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_sessions(count: usize) {
    metrics::gauge!(SESSIONS_ACTIVE).set(count as f64);
}
