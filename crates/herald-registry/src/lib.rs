//! # herald-registry
//!
//! The shared state behind every connection.
//!
//! - [`NotificationRegistry`]: notification records plus the expiry index
//! - [`SessionRegistry`]: which session owns which notifications, and the
//!   coordinated create/update/delete/list paths that keep both maps in step
//! - [`ExpiryReaper`]: background task that evicts records past their deadline
//! - [`Presenter`]: rendering seam, implemented outside this crate
//!
//! Lock order is fixed: session map, then notification map, then the
//! notification identifier pool. Nothing here holds a lock across an `.await`.

#![deny(unsafe_code)]

pub mod config;
pub mod metrics;
pub mod notifications;
pub mod presenter;
pub mod reaper;
pub mod sessions;

pub use config::RegistryConfig;
pub use notifications::NotificationRegistry;
pub use presenter::{PresentError, Presenter, present_logged};
pub use reaper::ExpiryReaper;
pub use sessions::SessionRegistry;
