//! Metric names emitted by the registries.

/// Notifications created (counter).
pub const NOTIFICATIONS_CREATED_TOTAL: &str = "notifications_created_total";
/// Notifications removed by delete or session teardown (counter).
pub const NOTIFICATIONS_DELETED_TOTAL: &str = "notifications_deleted_total";
/// Notifications evicted by the reaper (counter).
pub const NOTIFICATIONS_EXPIRED_TOTAL: &str = "notifications_expired_total";
/// Live notifications (gauge).
pub const NOTIFICATIONS_ACTIVE: &str = "notifications_active";
/// Registered sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
