//! Notification records.
//!
//! A [`NotificationRecord`] is exclusively owned by the notification
//! registry. Its identity (identifier, owning session, creation time) never
//! changes after construction; title, message, status, and expiry are
//! mutated in place.
//!
//! Records serialize to the wire view used in success envelopes:
//! `{notificationID, sessionID, title, message, status, source, createdAt, expiresAt?}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NotificationId, SessionId};

/// Source label used when a client does not name one.
pub const DEFAULT_SOURCE: &str = "unknown";

/// Lifecycle state of a notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Live and visible.
    #[default]
    Active,
    /// Deadline passed; about to be evicted.
    Expired,
    /// Anything else.
    #[serde(other)]
    Unknown,
}

impl NotificationStatus {
    /// Wire/log label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationDraft {
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Producer label (`"python"`, `"cpp"`, ...).
    pub source: Option<String>,
    /// Optional deadline after which the reaper evicts the record.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NotificationDraft {
    /// Draft with just a title and message.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            source: None,
            expires_at: None,
        }
    }

    /// Set the producer label.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the expiry deadline.
    #[must_use]
    pub fn with_expiry(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Field-selective update. `None` leaves the field unchanged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationPatch {
    /// New headline.
    pub title: Option<String>,
    /// New body text.
    pub message: Option<String>,
    /// New expiry deadline.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NotificationPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.message.is_none() && self.expires_at.is_none()
    }
}

/// One live notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(rename = "notificationID")]
    id: NotificationId,
    #[serde(rename = "sessionID")]
    session_id: SessionId,
    /// Headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Lifecycle state.
    pub status: NotificationStatus,
    /// Producer label.
    pub source: String,
    created_at: DateTime<Utc>,
    /// Deadline, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    /// Build an `Active` record from a draft.
    pub fn new(
        id: NotificationId,
        session_id: SessionId,
        draft: NotificationDraft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            session_id,
            title: draft.title,
            message: draft.message,
            status: NotificationStatus::Active,
            source: draft.source.unwrap_or_else(|| DEFAULT_SOURCE.to_owned()),
            created_at,
            expires_at: draft.expires_at,
        }
    }

    /// Notification identifier.
    pub fn id(&self) -> NotificationId {
        self.id
    }

    /// Owning session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Apply a patch in place. Returns the previous expiry when the patch
    /// moved the deadline, so callers can re-key an expiry index.
    pub fn apply(&mut self, patch: NotificationPatch) -> Option<Option<DateTime<Utc>>> {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        match patch.expires_at {
            Some(at) if self.expires_at != Some(at) => Some(self.expires_at.replace(at)),
            _ => None,
        }
    }

    /// Whether the deadline is at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Flag the record as expired.
    pub fn mark_expired(&mut self) {
        self.status = NotificationStatus::Expired;
    }
}
