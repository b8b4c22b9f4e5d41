//! `transcription` handler (§4.5): the teacher's recognized speech, recorded
//! as a transcript and fanned out as translations to every student.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{STATUS_CODE_POLICY_VIOLATION, code};
use crate::registry::Role;
use crate::ws::fanout::FanOutService;
use crate::ws::handlers::{HandlerContext, MessageHandler};
use crate::ws::protocol::TranscriptionRequest;
use crate::ws::response::ResponseWriter;

pub struct TranscriptionHandler;

#[async_trait]
impl MessageHandler for TranscriptionHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: Value) {
        let writer = ResponseWriter::new(ctx.peer);

        if ctx.peer.role() != Role::Teacher {
            writer.send_error("only a teacher connection may send a transcription", code::MISSING_FIELD);
            return;
        }

        let req: TranscriptionRequest = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = ?err, "malformed transcription payload");
                writer.send_error("malformed transcription message", code::MISSING_FIELD);
                return;
            }
        };
        if crate::validate::non_empty_text(&req.text).is_err() {
            writer.send_error("text must not be empty", code::MISSING_FIELD);
            return;
        }
        if let Some(lang) = &req.language_code {
            if crate::validate::language_code(lang).is_err() {
                writer.send_error("languageCode must be a non-empty BCP-47 tag", code::MISSING_FIELD);
                return;
            }
        }

        let Some(session_id) = ctx.peer.session_id() else {
            writer.send_error_and_close(
                "no session bound to this connection",
                code::INTERNAL,
                STATUS_CODE_POLICY_VIOLATION,
            );
            return;
        };
        let source_language = req
            .language_code
            .clone()
            .or_else(|| ctx.peer.language())
            .unwrap_or_else(|| "en".to_string());

        match crate::db::get() {
            Ok(mut conn) => {
                if let Err(err) =
                    ctx.state
                        .repository
                        .record_transcript(&mut conn, &session_id, &req.text, &source_language)
                {
                    tracing::warn!(error = ?err, session_id, "failed to record transcript");
                }
                if let Err(err) = ctx.state.repository.touch_activity(&mut conn, &session_id) {
                    tracing::warn!(error = ?err, session_id, "failed to touch session activity");
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
            .translate_and_broadcast(&session_id, &req.text, &source_language, tts_service_type.as_deref())
            .await;
    }
}
