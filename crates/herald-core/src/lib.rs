//! # herald-core
//!
//! Foundation types shared by every herald crate.
//!
//! - [`ids`]: `SessionId` / `NotificationId` newtypes (decimal string on the wire)
//! - [`pool`]: bounded, bitset-backed [`IdentifierPool`]
//! - [`notification`]: [`NotificationRecord`] and its draft/patch inputs
//! - [`errors`]: the protocol error taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod notification;
pub mod pool;

pub use errors::{HeraldError, PoolError, Result};
pub use ids::{NotificationId, ParseIdError, PooledId, SessionId};
pub use notification::{NotificationDraft, NotificationPatch, NotificationRecord, NotificationStatus};
pub use pool::IdentifierPool;
