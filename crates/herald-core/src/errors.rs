//! Error taxonomy.
//!
//! [`HeraldError`] covers every recoverable, connection-local failure the
//! protocol can report. Each variant maps to a stable [`code`](HeraldError::code)
//! that clients see in the `message` field of an error envelope.
//! [`PoolError`] is the identifier-pool level failure.

use thiserror::Error;

use crate::ids::{NotificationId, SessionId};

// ── Error code constants ────────────────────────────────────────────

/// Session already registered.
pub const DUPLICATE_SESSION: &str = "DuplicateSession";
/// Session not registered.
pub const UNKNOWN_SESSION: &str = "UnknownSession";
/// Session does not own the target, or claims another session's identity.
pub const UNAUTHORIZED: &str = "Unauthorized";
/// An identifier pool is full.
pub const RESOURCE_EXHAUSTED: &str = "ResourceExhausted";
/// Notification does not exist.
pub const NOT_FOUND: &str = "NotFound";
/// Envelope or payload could not be decoded.
pub const MALFORMED_PAYLOAD: &str = "MalformedPayload";
/// Action name not recognised.
pub const UNKNOWN_ACTION: &str = "UnknownAction";

/// Recoverable protocol and registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeraldError {
    /// `add_session` for a session that is already registered.
    #[error("session {0} already exists")]
    DuplicateSession(SessionId),

    /// Operation on a session that is not registered.
    #[error("session {0} does not exist")]
    UnknownSession(SessionId),

    /// Authorization gate rejected the request.
    #[error("{0}")]
    Unauthorized(String),

    /// No free identifier in the named pool.
    #[error("no free {kind} identifiers (capacity {capacity})")]
    ResourceExhausted {
        /// Which identifier space ran out.
        kind: &'static str,
        /// Size of that space.
        capacity: usize,
    },

    /// Notification is not live.
    #[error("notification {0} not found")]
    NotFound(NotificationId),

    /// Envelope or payload decoding failed.
    #[error("{0}")]
    MalformedPayload(String),

    /// Envelope named an action the dispatcher does not handle.
    #[error("unknown action '{0}'")]
    UnknownAction(String),
}

impl HeraldError {
    /// Machine-readable code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateSession(_) => DUPLICATE_SESSION,
            Self::UnknownSession(_) => UNKNOWN_SESSION,
            Self::Unauthorized(_) => UNAUTHORIZED,
            Self::ResourceExhausted { .. } => RESOURCE_EXHAUSTED,
            Self::NotFound(_) => NOT_FOUND,
            Self::MalformedPayload(_) => MALFORMED_PAYLOAD,
            Self::UnknownAction(_) => UNKNOWN_ACTION,
        }
    }

    /// Shorthand for an [`Unauthorized`](Self::Unauthorized) on a notification.
    pub fn not_owner(session: SessionId, notification: &str) -> Self {
        Self::Unauthorized(format!(
            "session {session} is not authorized for notification {notification}"
        ))
    }
}

/// Identifier pool failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every slot is in use.
    #[error("no free {kind} identifiers (capacity {capacity})")]
    Exhausted {
        /// Identifier space label.
        kind: &'static str,
        /// Pool capacity.
        capacity: usize,
    },

    /// Identifier lies outside the pool.
    #[error("{kind} identifier {id} is outside the pool (capacity {capacity})")]
    InvalidIdentifier {
        /// Identifier space label.
        kind: &'static str,
        /// Offending identifier.
        id: String,
        /// Pool capacity.
        capacity: usize,
    },
}

impl From<PoolError> for HeraldError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { kind, capacity } => Self::ResourceExhausted { kind, capacity },
            PoolError::InvalidIdentifier { .. } => Self::MalformedPayload(err.to_string()),
        }
    }
}

/// Result type for registry and protocol operations.
pub type Result<T> = std::result::Result<T, HeraldError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy_names() {
        let cases = [
            (HeraldError::DuplicateSession(SessionId::from(1)), "DuplicateSession"),
            (HeraldError::UnknownSession(SessionId::from(1)), "UnknownSession"),
            (HeraldError::Unauthorized("x".into()), "Unauthorized"),
            (
                HeraldError::ResourceExhausted { kind: "notification", capacity: 256 },
                "ResourceExhausted",
            ),
            (HeraldError::NotFound(NotificationId::from(3)), "NotFound"),
            (HeraldError::MalformedPayload("bad".into()), "MalformedPayload"),
            (HeraldError::UnknownAction("dance".into()), "UnknownAction"),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn display_messages_are_readable() {
        assert_eq!(
            HeraldError::NotFound(NotificationId::from(4)).to_string(),
            "notification 4 not found"
        );
        assert_eq!(
            HeraldError::UnknownAction("dance".into()).to_string(),
            "unknown action 'dance'"
        );
    }

    #[test]
    fn not_owner_names_both_sides() {
        let err = HeraldError::not_owner(SessionId::from(1), "5");
        assert_eq!(err.code(), UNAUTHORIZED);
        assert!(err.to_string().contains("session 1"));
        assert!(err.to_string().contains("notification 5"));
    }

    #[test]
    fn exhausted_pool_maps_to_resource_exhausted() {
        let err: HeraldError = PoolError::Exhausted { kind: "session", capacity: 32 }.into();
        assert_eq!(
            err,
            HeraldError::ResourceExhausted { kind: "session", capacity: 32 }
        );
    }
}
