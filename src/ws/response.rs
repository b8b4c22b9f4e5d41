//! Thin wrapper over a peer's outbound channel (§4.2). Handlers never touch
//! `PeerHandle::send_frame`/`close` directly so every send site produces the
//! same wire encoding and the error+close ordering invariant lives in one
//! place.

use crate::error;
use crate::registry::PeerHandle;
use crate::ws::protocol::OutboundFrame;

#[derive(Debug, Clone, Copy)]
pub struct ResponseWriter<'a> {
    peer: &'a PeerHandle,
}

impl<'a> ResponseWriter<'a> {
    pub fn new(peer: &'a PeerHandle) -> Self {
        Self { peer }
    }

    /// Best-effort send; a dead peer's closed channel is not an error the
    /// caller needs to react to (the reader task is already tearing down).
    pub fn send(&self, frame: &OutboundFrame) {
        if self.peer.send_frame(frame.to_json()).is_err() {
            tracing::debug!(
                connection_id = self.peer.connection_id,
                "dropped outbound frame, peer channel closed"
            );
        }
    }

    /// Sends an `error` frame then queues a close, in that order (§4.12).
    /// The close is queued through the same channel as the frame so it can
    /// never overtake it; if the channel is already gone both sends are
    /// silently dropped; the reader task's own teardown handles cleanup.
    pub fn send_error_and_close(&self, message: impl Into<String>, code: &'static str, close_code: u16) {
        self.send(&OutboundFrame::Error {
            message: message.into(),
            code,
        });
        self.peer.close(close_code, code.to_string());
    }

    pub fn send_error(&self, message: impl Into<String>, code: &'static str) {
        self.send(&OutboundFrame::Error {
            message: message.into(),
            code,
        });
    }
}

/// Maps a handler-level [`error::AppError`] to a wire error code, for
/// handlers that bubble a repository/speech failure up to the router.
pub fn wire_code_for(err: &error::AppError) -> &'static str {
    match err {
        error::AppError::InvalidClassroomCode => error::code::INVALID_CLASSROOM,
        error::AppError::InvalidTeacherCredential => error::code::INVALID_TEACHER_CREDENTIAL,
        error::AppError::SpeechPipeline(_) => error::code::TTS_FAILED,
        error::AppError::SessionOwnedByAnotherTeacher { .. } => {
            error::code::SESSION_OWNED_BY_ANOTHER_TEACHER
        }
        _ => error::code::INTERNAL,
    }
}
