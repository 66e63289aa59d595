//! Per-client connection handle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::close_code;
use herald_core::SessionId;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Frame queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON text frame.
    Text(String),
    /// Heartbeat ping.
    Ping,
}

/// Close code and reason sent when the connection is torn down.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// RFC 6455 close code.
    pub code: u16,
    /// Short human-readable reason.
    pub reason: String,
}

impl CloseReason {
    /// Close reason from a code and text.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Server going away.
    pub fn going_away() -> Self {
        Self::new(close_code::AWAY, "server shutting down")
    }
}

/// A connected WebSocket client bound to one session.
#[derive(Debug)]
pub struct ClientConnection {
    session_id: SessionId,
    tx: mpsc::Sender<Outbound>,
    closing: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    /// When the connection was accepted.
    pub connected_at: Instant,
    /// Whether the client has shown signs of life since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Frames dropped because the outbound queue was full or closed.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Handle for `session_id`. `closing` is cancelled when the connection
    /// should be torn down; pass a child of the server shutdown token.
    pub fn new(session_id: SessionId, tx: mpsc::Sender<Outbound>, closing: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            session_id,
            tx,
            closing,
            close_reason: Mutex::new(None),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Session bound to this connection.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queue a text frame. Returns `false` and counts a drop if the queue
    /// is full or the writer has gone.
    pub fn send(&self, text: String) -> bool {
        self.enqueue(Outbound::Text(text))
    }

    /// Queue a heartbeat ping.
    pub fn ping(&self) -> bool {
        self.enqueue(Outbound::Ping)
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the connection to close. The first reason wins.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.closing.cancel();
    }

    /// Reason recorded by [`close`](Self::close), or "going away" when the
    /// connection was cancelled by server shutdown.
    pub fn close_reason(&self) -> CloseReason {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or_else(CloseReason::going_away)
    }

    /// Whether teardown has been requested.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Token cancelled on teardown.
    pub fn closing(&self) -> &CancellationToken {
        &self.closing
    }

    /// Record client activity (pong, ping, or any frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
