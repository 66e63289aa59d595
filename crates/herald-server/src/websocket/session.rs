//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use herald_core::HeraldError;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, CloseReason, Outbound};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use super::manager::ConnectionManager;
use crate::config::ServerConfig;
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL,
    CONNECTIONS_OPENED_TOTAL, CONNECTIONS_REJECTED_TOTAL, OUTBOUND_DROPS_TOTAL,
};
use crate::protocol::{CONNECT_ACTION, Connection, ProtocolDispatcher, Reply};

/// How long the writer gets to flush queued frames and the close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// An inbound frame after transport-level classification.
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    /// Envelope text, from a text or UTF-8 binary frame.
    Text(String),
    /// Binary frame that is not UTF-8.
    NotUtf8(usize),
    /// Peer closed. A bare close frame reads as a normal closure.
    Close(CloseReason),
    /// Ping or pong.
    Control,
}

fn classify(msg: Message) -> Inbound {
    match msg {
        Message::Text(t) => Inbound::Text(t.as_str().to_owned()),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(s) => Inbound::Text(s),
            Err(_) => Inbound::NotUtf8(data.len()),
        },
        Message::Close(frame) => Inbound::Close(frame.map_or_else(
            || CloseReason::new(close_code::NORMAL, ""),
            |f| CloseReason::new(f.code, f.reason.as_str()),
        )),
        Message::Ping(_) | Message::Pong(_) => Inbound::Control,
    }
}

async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: Outbound,
) -> Result<(), axum::Error> {
    let msg = match frame {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Ping => Message::Ping(Bytes::new()),
    };
    ws_tx.send(msg).await
}

fn close_message(reason: &CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code,
        reason: reason.reason.clone().into(),
    }))
}

/// Run one client connection.
///
/// 1. Mints a session and sends the greeting, or refuses with close code
///    1013 when the session pool is full
/// 2. Dispatches inbound frames in arrival order
/// 3. Forwards replies and heartbeat pings through the outbound queue
/// 4. Tears the session down exactly once on any exit path
#[instrument(skip_all, fields(session_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    dispatcher: Arc<ProtocolDispatcher>,
    connections: Arc<ConnectionManager>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let conn = Connection::new();

    let session_id = match dispatcher.open(&conn) {
        Ok(id) => id,
        Err(e) => {
            counter!(CONNECTIONS_REJECTED_TOTAL).increment(1);
            let reply = Reply::error(None, Some(CONNECT_ACTION.to_owned()), &e);
            let _ = ws_tx.send(Message::Text(reply.to_json().into())).await;
            let _ = ws_tx
                .send(close_message(&CloseReason::new(
                    close_code::AGAIN,
                    "session capacity reached",
                )))
                .await;
            return;
        }
    };
    let _ = tracing::Span::current().record("session_id", tracing::field::display(session_id));

    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(config.outbound_queue);
    let client = Arc::new(ClientConnection::new(
        session_id,
        send_tx,
        shutdown.child_token(),
    ));
    connections.add(Arc::clone(&client)).await;

    let started = Instant::now();
    info!("client connected");
    counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);

    let _ = client.send(Reply::connected(session_id).to_json());

    let writer_conn = Arc::clone(&client);
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                () = writer_conn.closing().cancelled() => {
                    while let Ok(frame) = send_rx.try_recv() {
                        if write_frame(&mut ws_tx, frame).await.is_err() {
                            return;
                        }
                    }
                    let _ = ws_tx.send(close_message(&writer_conn.close_reason())).await;
                    return;
                }
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { return };
                    if write_frame(&mut ws_tx, frame).await.is_err() {
                        writer_conn.close(CloseReason::new(close_code::ABNORMAL, "write failed"));
                        return;
                    }
                }
            }
        }
    });

    let hb_conn = Arc::clone(&client);
    let (interval, timeout) = (config.heartbeat_interval(), config.heartbeat_timeout());
    let heartbeat = tokio::spawn(async move {
        let cancel = hb_conn.closing().clone();
        if run_heartbeat(Arc::clone(&hb_conn), interval, timeout, cancel).await
            == HeartbeatResult::TimedOut
        {
            warn!(timeout_ms = timeout.as_millis(), "client unresponsive, disconnecting");
            hb_conn.close(CloseReason::new(close_code::POLICY, "heartbeat timeout"));
        }
    });

    loop {
        let next = tokio::select! {
            biased;
            () = client.closing().cancelled() => break,
            next = ws_rx.next() => next,
        };
        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                client.close(CloseReason::new(close_code::ABNORMAL, "read failed"));
                break;
            }
            None => {
                client.close(CloseReason::new(close_code::ABNORMAL, "stream ended"));
                break;
            }
        };
        client.mark_alive();

        let text = match classify(msg) {
            Inbound::Text(text) => text,
            Inbound::NotUtf8(len) => {
                info!(len, "received non-UTF-8 binary frame");
                let err = HeraldError::MalformedPayload("binary frame is not valid UTF-8".into());
                let _ = client.send(Reply::error(Some(session_id), None, &err).to_json());
                continue;
            }
            Inbound::Close(reason) => {
                info!(code = reason.code, reason = %reason.reason, "client sent close frame");
                client.close(reason);
                break;
            }
            Inbound::Control => continue,
        };

        let reply = dispatcher.handle(&conn, &text).await;
        if !client.send(reply.to_json()) {
            counter!(OUTBOUND_DROPS_TOTAL).increment(1);
            warn!("outbound queue full, reply dropped");
        }
    }

    // Stops the writer and heartbeat if nothing else has.
    client.close(CloseReason::new(close_code::NORMAL, "connection closed"));
    let reason = client.close_reason();
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        warn!("writer did not drain in time");
        writer.abort();
    }
    let _ = heartbeat.await;

    // Untrack before the session identifier can be reused.
    let _ = connections.remove(session_id).await;
    let _ = dispatcher.close(&conn, Some(reason.code), &reason.reason);

    info!(code = reason.code, dropped = client.drop_count(), "client disconnected");
    counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
