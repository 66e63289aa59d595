//! Wire envelopes.
//!
//! Inbound: `{"action": "...", "sessionID": "...", "payload": {...}}`.
//! Outbound: `{"status": "success"|"error", "sessionID"?, "action"?, "message"?, "payload"?}`.

use chrono::{DateTime, Utc};
use herald_core::{HeraldError, NotificationId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Recognised actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Create a notification.
    Create,
    /// Change title, message, or expiry.
    Update,
    /// Remove a notification.
    Delete,
    /// Present one notification.
    Display,
    /// Present every notification the session owns.
    DisplayAll,
    /// Liveness echo.
    Ping,
}

impl Action {
    /// Look up an action by wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "display" => Some(Self::Display),
            "displayAll" => Some(Self::DisplayAll),
            "ping" => Some(Self::Ping),
            _ => None,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Display => "display",
            Self::DisplayAll => "displayAll",
            Self::Ping => "ping",
        }
    }
}

/// Action name used in the greeting sent when a connection opens.
pub const CONNECT_ACTION: &str = "connect";

/// Decoded inbound envelope. Fields are kept raw so each can be rejected
/// with the right error at the right step.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Envelope {
    /// Action name.
    pub action: String,
    /// Session the sender claims to be.
    #[serde(rename = "sessionID")]
    pub session_id: String,
    /// Action-specific payload.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Decode a text frame.
    ///
    /// On failure returns the error along with the action name, if one could
    /// be recovered, so the error reply can echo it.
    pub fn decode(text: &str) -> Result<Self, (HeraldError, Option<String>)> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| (HeraldError::MalformedPayload(format!("invalid JSON: {e}")), None))?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .map(str::to_owned);
        serde_json::from_value(value).map_err(|e| {
            (
                HeraldError::MalformedPayload(format!("invalid envelope: {e}")),
                action,
            )
        })
    }

    /// Decode the payload as `T`. A missing payload decodes from `{}`.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, HeraldError> {
        let payload = match &self.payload {
            Some(Value::Null) | None => json!({}),
            Some(v) => v.clone(),
        };
        serde_json::from_value(payload)
            .map_err(|e| HeraldError::MalformedPayload(format!("invalid {} payload: {e}", self.action)))
    }
}

/// `create` payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CreatePayload {
    /// Headline.
    pub title: String,
    /// Body.
    pub message: String,
    /// Producer label.
    #[serde(default)]
    pub source: Option<String>,
    /// Deadline, Unix seconds.
    #[serde(default)]
    pub expiry: Option<i64>,
}

/// `update` payload.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct UpdatePayload {
    /// Target.
    #[serde(rename = "notificationID")]
    pub notification_id: NotificationId,
    /// New headline.
    #[serde(default)]
    pub title: Option<String>,
    /// New body.
    #[serde(default)]
    pub message: Option<String>,
    /// New deadline, Unix seconds.
    #[serde(default)]
    pub expiry: Option<i64>,
}

/// Payload naming a single notification (`delete`, `display`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TargetPayload {
    /// Target.
    #[serde(rename = "notificationID")]
    pub notification_id: NotificationId,
}

/// Convert a Unix-seconds expiry into a timestamp.
pub fn expiry_from_unix(secs: i64) -> Result<DateTime<Utc>, HeraldError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| HeraldError::MalformedPayload(format!("expiry {secs} is out of range")))
}

/// Outbound status flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// Request succeeded.
    Success,
    /// Request failed; connection stays open.
    Error,
}

/// Outbound envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Outcome.
    pub status: ReplyStatus,
    /// Session the reply is for.
    #[serde(rename = "sessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Action that produced the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Error code on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Result data, or `{reason}` on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Reply {
    /// Successful reply.
    pub fn success(session_id: SessionId, action: Action, payload: Value) -> Self {
        Self {
            status: ReplyStatus::Success,
            session_id: Some(session_id),
            action: Some(action.as_str().to_owned()),
            message: None,
            payload: Some(payload),
        }
    }

    /// Error reply carrying the error's code and reason.
    pub fn error(session_id: Option<SessionId>, action: Option<String>, err: &HeraldError) -> Self {
        Self {
            status: ReplyStatus::Error,
            session_id,
            action,
            message: Some(err.code().to_owned()),
            payload: Some(json!({ "reason": err.to_string() })),
        }
    }

    /// Greeting sent once a session is minted.
    pub fn connected(session_id: SessionId) -> Self {
        Self {
            status: ReplyStatus::Success,
            session_id: Some(session_id),
            action: Some(CONNECT_ACTION.to_owned()),
            message: None,
            payload: None,
        }
    }

    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        self.status == ReplyStatus::Error
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize reply");
            String::from(r#"{"status":"error","message":"MalformedPayload"}"#)
        })
    }
}
