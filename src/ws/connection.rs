//! WebSocket upgrade endpoint (§6, §4.1). This is the only place in the core
//! that touches `salvo::websocket` directly; everything it reads or writes
//! past the initial handshake goes through [`crate::registry::PeerState`]
//! and [`router::dispatch`]. Reader and writer run as two halves of the
//! split socket, the same shape as the teacher's per-connection handler
//! task, with the writer draining a command channel instead of an mpsc of
//! `ConnectionCommand`.

use futures::{SinkExt, StreamExt};
use salvo::prelude::*;
use salvo::websocket::{Message, WebSocket, WebSocketUpgrade};
use ulid::Ulid;

use crate::classroom_code::ClassroomCode;
use crate::error;
use crate::registry::{OutboundItem, Role};
use crate::ws;
use crate::ws::handlers::HandlerContext;
use crate::ws::protocol::OutboundFrame;
use crate::ws::response::ResponseWriter;
use crate::ws::router;

#[handler]
pub async fn upgrade(req: &mut Request, res: &mut Response) -> Result<(), StatusError> {
    let query_code = req.query::<String>("code");
    WebSocketUpgrade::new()
        .upgrade(req, res, move |socket| handle(socket, query_code))
        .await
}

/// `query_code` is the `?code=` a student's client connects with; a teacher
/// connects with none and gets a fresh tentative session id that
/// `register`'s teacher path later durably adopts (§4.4).
async fn handle(socket: WebSocket, query_code: Option<String>) {
    let state = ws::get();

    let session_id = match &query_code {
        Some(raw) => {
            let valid = ClassroomCode::try_from(raw.as_str())
                .ok()
                .and_then(|code| state.classroom_codes.is_valid(code));
            match valid {
                Some(session_id) => session_id,
                None => {
                    reject(socket, "Classroom session expired or invalid", error::code::INVALID_CLASSROOM)
                        .await;
                    return;
                }
            }
        }
        None => Ulid::new().to_string(),
    };

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(crate::registry::OUTBOUND_CHANNEL_CAPACITY);
    let peer = state.registry.add(outbound_tx);
    state.registry.bind_session(&peer, session_id.clone());
    peer.mark_alive();

    ResponseWriter::new(&peer).send(&OutboundFrame::Connection {
        status: "connected",
        session_id: session_id.clone(),
        classroom_code: None,
    });

    let (mut sink, mut stream) = socket.split();

    let writer_task = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            // §4.10: a liveness probe is both a protocol-level ping (for
            // clients that only answer those) and an application-level
            // `{type:ping}` frame (for clients that don't).
            if matches!(item, OutboundItem::Ping) && sink.send(Message::ping(Vec::new())).await.is_err() {
                break;
            }
            let (message, is_close) = match item {
                OutboundItem::Frame(json) => (Message::text(json), false),
                OutboundItem::Ping => (
                    Message::text(
                        OutboundFrame::Ping {
                            timestamp: chrono::Utc::now().timestamp_millis(),
                        }
                        .to_json(),
                    ),
                    false,
                ),
                OutboundItem::Close { code, reason } => (Message::close_with(code, reason), true),
            };
            if sink.send(message).await.is_err() || is_close {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = peer.terminated() => {
                peer.close(error::STATUS_CODE_POLICY_VIOLATION, "liveness check failed".to_string());
                break;
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        if message.is_close() {
                            break;
                        }
                        peer.mark_alive();
                        if let Ok(text) = message.to_str() {
                            let ctx = HandlerContext { peer: &peer, state: &state };
                            router::dispatch(&state.handlers, &ctx, text).await;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(error = ?err, connection_id = peer.connection_id, "websocket read error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Give a queued error+close frame a moment to actually reach the wire
    // before we tear the writer down (§4.12 ordering).
    let _ = tokio::time::timeout(std::time::Duration::from_millis(500), &mut writer_task).await;
    writer_task.abort();

    let role = peer.role();
    let bound_session_id = peer.session_id();
    state.registry.remove(peer.connection_id);
    if let Some(session_id) = bound_session_id {
        state.lifecycle.handle_disconnect(&session_id, role);
    }
}

async fn reject(socket: WebSocket, message: &str, code: &'static str) {
    let (mut sink, _stream) = socket.split();
    let _ = sink
        .send(Message::text(
            OutboundFrame::Error {
                message: message.to_string(),
                code,
            }
            .to_json(),
        ))
        .await;
    let _ = sink
        .send(Message::close_with(error::STATUS_CODE_POLICY_VIOLATION, code))
        .await;
}
