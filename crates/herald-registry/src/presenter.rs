//! Rendering seam.
//!
//! A [`Presenter`] shows a notification somewhere a human will see it. The
//! registry and dispatcher never depend on the outcome: failures are logged
//! by [`present_logged`] and go no further. Presenters are always invoked
//! after every registry lock has been released.

use async_trait::async_trait;
use herald_core::NotificationRecord;
use thiserror::Error;
use tracing::warn;

/// Presenter failure.
#[derive(Debug, Error)]
pub enum PresentError {
    /// Output sink could not be written.
    #[error("presenter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else the presenter wants to report.
    #[error("{0}")]
    Other(String),
}

/// Something that renders notifications.
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Render one notification.
    async fn present(&self, notification: &NotificationRecord) -> Result<(), PresentError>;
}

/// Present and log, never propagate.
pub async fn present_logged(presenter: &dyn Presenter, notification: &NotificationRecord) {
    if let Err(e) = presenter.present(notification).await {
        warn!(
            presenter = presenter.name(),
            notification_id = %notification.id(),
            error = %e,
            "presenter failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use herald_core::{NotificationDraft, NotificationId, SessionId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing(AtomicUsize);

    #[async_trait]
    impl Presenter for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn present(&self, _notification: &NotificationRecord) -> Result<(), PresentError> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Err(PresentError::Other("display unavailable".into()))
        }
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let presenter = Failing(AtomicUsize::new(0));
        let record = NotificationRecord::new(
            NotificationId::from(0),
            SessionId::from(0),
            NotificationDraft::new("T", "M"),
            Utc::now(),
        );
        present_logged(&presenter, &record).await;
        assert_eq!(presenter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn io_errors_convert() {
        let err: PresentError = std::io::Error::other("closed").into();
        assert!(err.to_string().contains("closed"));
    }
}
