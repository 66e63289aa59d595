//! Background eviction of expired notifications.
//!
//! The reaper looks at the earliest entry of the expiry index. Due entries
//! are evicted one after another; otherwise it sleeps until the earliest
//! deadline, capped at `max_wait`, and wakes early when a nearer deadline is
//! indexed or the cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::NOTIFICATIONS_EXPIRED_TOTAL;
use crate::sessions::SessionRegistry;

/// Why the reaper loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperExit {
    /// Cancellation token fired.
    Cancelled,
}

/// Expiry reaper task.
#[derive(Debug, Clone)]
pub struct ExpiryReaper {
    sessions: Arc<SessionRegistry>,
    max_wait: Duration,
}

impl ExpiryReaper {
    /// Reaper over `sessions` that never sleeps longer than `max_wait`.
    pub fn new(sessions: Arc<SessionRegistry>, max_wait: Duration) -> Self {
        Self { sessions, max_wait }
    }

    /// Evict every notification whose deadline has passed.
    ///
    /// Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let notifications = self.sessions.notifications();
        let mut evicted = 0;
        loop {
            let now = Utc::now();
            let Some((at, id)) = notifications.earliest_deadline() else {
                break;
            };
            if at > now {
                break;
            }
            if let Some(record) = self.sessions.evict_expired(id, now) {
                evicted += 1;
                metrics::counter!(NOTIFICATIONS_EXPIRED_TOTAL).increment(1);
                info!(
                    notification_id = %record.id(),
                    session_id = %record.session_id(),
                    title = %record.title,
                    "notification expired"
                );
            } else if notifications.earliest_deadline() == Some((at, id)) {
                break;
            }
        }
        evicted
    }

    /// How long to sleep before the next sweep.
    pub fn next_wait(&self) -> Duration {
        match self.sessions.notifications().earliest_deadline() {
            Some((at, _)) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_wait),
            None => self.max_wait,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> ReaperExit {
        let notifications = Arc::clone(self.sessions.notifications());
        info!(max_wait_secs = self.max_wait.as_secs(), "expiry reaper started");
        loop {
            let _ = self.sweep();
            let wait = self.next_wait();
            debug!(wait_ms = wait.as_millis(), "expiry reaper waiting");

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("expiry reaper stopped");
                    return ReaperExit::Cancelled;
                }
                () = notifications.deadline_changed() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let _ = self.run(cancel).await;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::NotificationRegistry;
    use chrono::Duration as ChronoDuration;
    use herald_core::{NotificationDraft, NotificationPatch, SessionId};

    fn sessions() -> Arc<SessionRegistry> {
        let reg = SessionRegistry::new(Arc::new(NotificationRegistry::new(16, true)));
        reg.add_session(SessionId::from(0)).unwrap();
        Arc::new(reg)
    }

    fn s0() -> SessionId {
        SessionId::from(0)
    }

    #[test]
    fn sweep_evicts_only_due_records() {
        let sessions = sessions();
        let now = Utc::now();
        let _ = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("old", "m").with_expiry(now - ChronoDuration::seconds(5)),
            )
            .unwrap();
        let _ = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("older", "m").with_expiry(now - ChronoDuration::seconds(50)),
            )
            .unwrap();
        let keep = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("new", "m").with_expiry(now + ChronoDuration::seconds(60)),
            )
            .unwrap();

        let reaper = ExpiryReaper::new(Arc::clone(&sessions), Duration::from_secs(300));
        assert_eq!(reaper.sweep(), 2);
        let left = sessions.list_notifications(s0()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id(), keep.id());
    }

    #[test]
    fn wait_is_capped() {
        let sessions = sessions();
        let reaper = ExpiryReaper::new(Arc::clone(&sessions), Duration::from_secs(2));
        assert_eq!(reaper.next_wait(), Duration::from_secs(2));

        let _ = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("far", "m")
                    .with_expiry(Utc::now() + ChronoDuration::seconds(3600)),
            )
            .unwrap();
        assert_eq!(reaper.next_wait(), Duration::from_secs(2));
    }

    #[test]
    fn wait_tracks_earliest_deadline() {
        let sessions = sessions();
        let reaper = ExpiryReaper::new(Arc::clone(&sessions), Duration::from_secs(300));
        let _ = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("soon", "m")
                    .with_expiry(Utc::now() + ChronoDuration::seconds(10)),
            )
            .unwrap();
        let wait = reaper.next_wait();
        assert!(wait <= Duration::from_secs(10));
        assert!(wait > Duration::from_secs(8));
    }

    #[tokio::test]
    async fn past_expiry_is_evicted_promptly() {
        let sessions = sessions();
        let cancel = CancellationToken::new();
        let handle = ExpiryReaper::new(Arc::clone(&sessions), Duration::from_secs(300))
            .spawn(cancel.clone());

        // Let the reaper reach its wait with an empty index.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("T", "M").with_expiry(Utc::now() - ChronoDuration::seconds(1)),
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while sessions.is_authorized(s0(), r.id()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(sessions.list_notifications(s0()).unwrap().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn nearer_deadline_preempts_long_wait() {
        let sessions = sessions();
        let cancel = CancellationToken::new();
        let _ = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("far", "m")
                    .with_expiry(Utc::now() + ChronoDuration::seconds(3600)),
            )
            .unwrap();
        let handle = ExpiryReaper::new(Arc::clone(&sessions), Duration::from_secs(300))
            .spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let near = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("near", "m")
                    .with_expiry(Utc::now() + ChronoDuration::milliseconds(100)),
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while sessions.is_authorized(s0(), near.id()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sessions.list_notifications(s0()).unwrap().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn deadline_moved_closer_by_update_is_evicted() {
        let sessions = sessions();
        let cancel = CancellationToken::new();
        let r = sessions
            .create_notification(
                s0(),
                NotificationDraft::new("later", "m")
                    .with_expiry(Utc::now() + ChronoDuration::seconds(3600)),
            )
            .unwrap();
        let handle = ExpiryReaper::new(Arc::clone(&sessions), Duration::from_secs(300))
            .spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = sessions
            .update_notification(
                s0(),
                r.id(),
                NotificationPatch {
                    expires_at: Some(Utc::now() + ChronoDuration::milliseconds(100)),
                    ..Default::default()
                },
            )
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while sessions.is_authorized(s0(), r.id()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(sessions.list_notifications(s0()).unwrap().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_is_prompt_and_idempotent() {
        let sessions = sessions();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            ExpiryReaper::new(sessions, Duration::from_secs(300)).run(cancel.clone()),
        );
        cancel.cancel();
        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ReaperExit::Cancelled);
    }
}
