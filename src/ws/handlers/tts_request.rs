//! `tts_request` handler (§4.7): on-demand synthesis for a single piece of
//! text, independent of the teacher's live transcription stream (e.g. replay
//! or a student-triggered re-speak).

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use crate::error::code;
use crate::speech::{AudioArtifact, SynthesisOptions};
use crate::ws::handlers::{HandlerContext, MessageHandler};
use crate::ws::protocol::{ErrorBody, OutboundFrame, SpeechParams, TtsRequestFrame};
use crate::ws::response::ResponseWriter;

pub struct TtsRequestHandler;

#[async_trait]
impl MessageHandler for TtsRequestHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: Value) {
        let writer = ResponseWriter::new(ctx.peer);

        let req: TtsRequestFrame = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = ?err, "malformed tts_request payload");
                writer.send_error("malformed tts_request message", code::MISSING_FIELD);
                return;
            }
        };
        let Some(text) = req.text.filter(|t| !t.trim().is_empty()) else {
            writer.send_error("text must not be empty", code::MISSING_FIELD);
            return;
        };
        let language = req
            .language_code
            .or_else(|| ctx.peer.language())
            .unwrap_or_else(|| "en".to_string());
        let options = SynthesisOptions {
            voice: req.voice,
            rate: None,
        };

        let frame = match ctx.state.speech.synthesize(&text, &language, &options).await {
            Ok(AudioArtifact::Bytes { data, .. }) => OutboundFrame::TtsResponse {
                status: "success",
                audio_data: Some(BASE64.encode(data)),
                use_client_speech: Some(false),
                speech_params: None,
                error: None,
            },
            Ok(AudioArtifact::ClientSpeech { voice, rate }) => OutboundFrame::TtsResponse {
                status: "success",
                audio_data: None,
                use_client_speech: Some(true),
                speech_params: Some(SpeechParams { voice, rate }),
                error: None,
            },
            Ok(AudioArtifact::None) => OutboundFrame::TtsResponse {
                status: "success",
                audio_data: None,
                use_client_speech: None,
                speech_params: None,
                error: None,
            },
            Err(err) => OutboundFrame::TtsResponse {
                status: "error",
                audio_data: None,
                use_client_speech: None,
                speech_params: None,
                error: Some(ErrorBody {
                    message: err.to_string(),
                    code: code::TTS_FAILED,
                }),
            },
        };
        writer.send(&frame);
    }
}
