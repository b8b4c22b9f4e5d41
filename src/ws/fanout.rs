//! Translate-then-broadcast (§4.6): one `SpeechPipeline::translate` call per
//! distinct target language among a session's students, each result fanned
//! out to every student in that language group. Per §5, "all per-language
//! translations MAY run concurrently" — legs race each other via
//! `futures::future::join_all` rather than a sequential loop, since nothing
//! orders one target language's leg relative to another's. Per-student
//! ordering within a language group is free (they all receive the same
//! translation), and successive transcriptions for the same student are
//! still strictly ordered because the teacher's inbound handler runs this
//! whole call sequentially per connection.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::future::join_all;

use crate::registry::{ConnectionRegistry, PeerHandle};
use crate::repository::SharedSessionRepository;
use crate::speech::{AudioArtifact, SharedSpeechPipeline, SynthesisOptions};
use crate::ws::protocol::{Latency, OutboundFrame, SpeechParams};
use crate::ws::response::ResponseWriter;

pub struct FanOutService {
    registry: Arc<ConnectionRegistry>,
    speech: SharedSpeechPipeline,
    repository: SharedSessionRepository,
}

/// One target language's outcome, carried out of the concurrent translate
/// phase so sends and persistence can happen afterward without re-awaiting.
struct Leg {
    target_language: String,
    students: Vec<PeerHandle>,
    translated_text: String,
    source_text: String,
    audio: AudioArtifact,
    latency_ms: i64,
    succeeded: bool,
}

impl FanOutService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        speech: SharedSpeechPipeline,
        repository: SharedSessionRepository,
    ) -> Self {
        Self {
            registry,
            speech,
            repository,
        }
    }

    /// Translates `original_text` into every language a student in
    /// `session_id` is registered for, and pushes a `translation` frame to
    /// each of them. Per §4.6, a failure translating into one language never
    /// prevents delivery to the others; each leg is independent.
    pub async fn translate_and_broadcast(
        &self,
        session_id: &str,
        original_text: &str,
        source_language: &str,
        tts_service_type: Option<&str>,
    ) {
        let groups = self.registry.students_for_fan_out(session_id);
        if groups.is_empty() {
            return;
        }

        let legs = join_all(groups.into_iter().map(|(target_language, students)| {
            self.run_leg(original_text, source_language, target_language, students)
        }))
        .await;

        let mut delivered_languages = 0i32;
        for leg in &legs {
            let (audio_data, use_client_speech, speech_params) = encode_audio(&leg.audio);
            let frame = OutboundFrame::Translation {
                text: leg.translated_text.clone(),
                original_text: leg.source_text.clone(),
                source_language: source_language.to_string(),
                target_language: leg.target_language.clone(),
                tts_service_type: tts_service_type.map(str::to_string),
                audio_data,
                use_client_speech,
                speech_params,
                latency: Latency::new(leg.latency_ms, 0, 0),
            };
            for student in &leg.students {
                ResponseWriter::new(student).send(&frame);
            }
            if leg.succeeded {
                delivered_languages += 1;
            }
        }

        if delivered_languages == 0 {
            return;
        }
        let session_id = session_id.to_string();
        let source_language = source_language.to_string();
        let repository = self.repository.clone();
        let original_text = original_text.to_string();
        let successful_legs: Vec<(String, String, i64)> = legs
            .into_iter()
            .filter(|leg| leg.succeeded)
            .map(|leg| (leg.target_language, leg.translated_text, leg.latency_ms))
            .collect();
        // Persistence never gates the broadcast above (§7 PersistenceError);
        // it only needs to happen, not happen before the frames go out.
        tokio::spawn(async move {
            let Ok(mut conn) = crate::db::get() else {
                tracing::warn!(session_id, "db unavailable while recording translations");
                return;
            };
            if let Err(err) = repository.record_translations(
                &mut conn,
                &session_id,
                successful_legs.len() as i32,
            ) {
                tracing::warn!(error = ?err, session_id, "failed to record translation count");
            }
            for (target_language, translated_text, latency_ms) in &successful_legs {
                if let Err(err) = repository.record_translation(
                    &mut conn,
                    &session_id,
                    &source_language,
                    target_language,
                    &original_text,
                    translated_text,
                    *latency_ms as i32,
                ) {
                    tracing::warn!(error = ?err, session_id, target_language, "failed to record translation row");
                }
            }
        });
    }

    /// Runs one target language's translate call (or the identity shortcut
    /// when it equals the source language) and packages the outcome without
    /// sending or persisting anything — the caller does both once every leg
    /// in the batch has settled.
    async fn run_leg(
        &self,
        original_text: &str,
        source_language: &str,
        target_language: String,
        students: Vec<PeerHandle>,
    ) -> Leg {
        if target_language == source_language {
            return Leg {
                target_language,
                students,
                translated_text: original_text.to_string(),
                source_text: original_text.to_string(),
                audio: AudioArtifact::ClientSpeech { voice: None, rate: None },
                latency_ms: 0,
                succeeded: true,
            };
        }

        let options = students
            .first()
            .map(|s| SynthesisOptions {
                voice: s.settings().extra.get("voice").and_then(|v| v.as_str()).map(str::to_string),
                rate: None,
            })
            .unwrap_or_default();

        let started = Instant::now();
        match self
            .speech
            .translate(original_text, source_language, &target_language, &options)
            .await
        {
            Ok(artifact) => Leg {
                target_language,
                students,
                translated_text: artifact.translated_text,
                source_text: original_text.to_string(),
                audio: artifact.audio,
                latency_ms: started.elapsed().as_millis() as i64,
                succeeded: true,
            },
            Err(err) => {
                tracing::warn!(
                    target_language,
                    error = ?err,
                    "translation leg failed, degrading to untranslated text"
                );
                Leg {
                    target_language,
                    students,
                    translated_text: original_text.to_string(),
                    source_text: original_text.to_string(),
                    audio: AudioArtifact::None,
                    latency_ms: 0,
                    succeeded: false,
                }
            }
        }
    }
}

fn encode_audio(artifact: &AudioArtifact) -> (Option<String>, Option<bool>, Option<SpeechParams>) {
    match artifact {
        AudioArtifact::Bytes { data, .. } => (Some(BASE64.encode(data)), Some(false), None),
        AudioArtifact::ClientSpeech { voice, rate } => (
            None,
            Some(true),
            Some(SpeechParams {
                voice: voice.clone(),
                rate: *rate,
            }),
        ),
        AudioArtifact::None => (None, None, None),
    }
}
