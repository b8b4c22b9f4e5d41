//! `audio` handler (§4.6): raw teacher audio, transcribed server-side and
//! then routed through the same fan-out path as a `transcription` message.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use crate::error::{STATUS_CODE_POLICY_VIOLATION, code};
use crate::registry::Role;
use crate::ws::fanout::FanOutService;
use crate::ws::handlers::{HandlerContext, MessageHandler};
use crate::ws::protocol::AudioRequest;
use crate::ws::response::ResponseWriter;

pub struct AudioHandler;

#[async_trait]
impl MessageHandler for AudioHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: Value) {
        let writer = ResponseWriter::new(ctx.peer);

        if ctx.peer.role() != Role::Teacher {
            writer.send_error("only a teacher connection may send audio", code::MISSING_FIELD);
            return;
        }

        let req: AudioRequest = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = ?err, "malformed audio payload");
                writer.send_error("malformed audio message", code::MISSING_FIELD);
                return;
            }
        };
        let bytes = match BASE64.decode(req.data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(error = ?err, "audio payload is not valid base64");
                writer.send_error("audio data must be base64-encoded", code::MISSING_FIELD);
                return;
            }
        };

        let Some(session_id) = ctx.peer.session_id() else {
            writer.send_error_and_close(
                "no session bound to this connection",
                code::INTERNAL,
                STATUS_CODE_POLICY_VIOLATION,
            );
            return;
        };
        let source_language = ctx.peer.language().unwrap_or_else(|| "en".to_string());

        let transcribed = match ctx
            .state
            .speech
            .transcribe(&bytes, "audio/webm", &source_language)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = ?err, session_id, "speech transcription failed");
                writer.send_error(err.to_string(), code::TTS_FAILED);
                return;
            }
        };

        match crate::db::get() {
            Ok(mut conn) => {
                if let Err(err) = ctx.state.repository.record_transcript(
                    &mut conn,
                    &session_id,
                    &transcribed,
                    &source_language,
                ) {
                    tracing::warn!(error = ?err, session_id, "failed to record transcript");
                }
            }
            Err(err) => {
                tracing::warn!(error = ?err, session_id, "db unavailable while recording transcript");
            }
        }

        let fanout = FanOutService::new(
            ctx.state.registry.clone(),
            ctx.state.speech.clone(),
            ctx.state.repository.clone(),
        );
        let tts_service_type = ctx.peer.settings().tts_service_type;
        fanout
            .translate_and_broadcast(&session_id, &transcribed, &source_language, tts_service_type.as_deref())
            .await;
    }
}
