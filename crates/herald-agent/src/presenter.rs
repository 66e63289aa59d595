//! Built-in presenters.

use std::io::Write;

use async_trait::async_trait;
use herald_core::NotificationRecord;
use herald_registry::{PresentError, Presenter};
use parking_lot::Mutex;
use tracing::info;

/// Render a boxed card:
///
/// ```text
/// ╭─────────────────╮
/// │ [python] Title  │
/// │ message body    │
/// ╰─────────────────╯
/// ```
pub fn render_card(record: &NotificationRecord) -> String {
    let heading = format!("[{}] {}", record.source, record.title);
    let lines: Vec<&str> = std::iter::once(heading.as_str())
        .chain(record.message.lines())
        .collect();
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let rule = "─".repeat(width + 2);

    let mut card = format!("╭{rule}╮\n");
    for line in lines {
        let pad = width - line.chars().count();
        card.push_str(&format!("│ {line}{} │\n", " ".repeat(pad)));
    }
    card.push_str(&format!("╰{rule}╯\n"));
    card
}

/// Prints each notification as a boxed card.
pub struct TerminalPresenter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalPresenter {
    /// Presenter writing to stdout.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// Presenter writing to `out`.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl Presenter for TerminalPresenter {
    fn name(&self) -> &'static str {
        "terminal"
    }

    async fn present(&self, record: &NotificationRecord) -> Result<(), PresentError> {
        let card = render_card(record);
        let mut out = self.out.lock();
        out.write_all(card.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

/// Emits each notification as a structured `info` event.
#[derive(Debug, Default)]
pub struct LogPresenter;

#[async_trait]
impl Presenter for LogPresenter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn present(&self, record: &NotificationRecord) -> Result<(), PresentError> {
        info!(
            notification_id = %record.id(),
            session_id = %record.session_id(),
            source = %record.source,
            title = %record.title,
            message = %record.message,
            "notification"
        );
        Ok(())
    }
}
