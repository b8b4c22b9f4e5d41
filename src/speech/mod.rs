//! Speech pipeline adapter (§4.15).
//!
//! The actual ASR/MT/TTS services are explicitly out of scope; this module
//! only defines the contract the fan-out and handler layers call through,
//! plus [`EchoSpeechPipeline`], a local stand-in that lets the crate run
//! without any external service configured.

use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum SpeechPipelineError {
    #[error("speech pipeline call timed out")]
    Timeout,
    #[error("speech pipeline backend error: {0}")]
    Backend(String),
}

/// Result of a translate/synthesize call. The `ClientSpeech` variant tells
/// the caller "don't attach audio, the client renders this with its own
/// speech synthesis" rather than treating an empty payload as a failure.
#[derive(Debug, Clone)]
pub enum AudioArtifact {
    Bytes { data: Vec<u8>, mime: String, service: String },
    ClientSpeech { voice: Option<String>, rate: Option<f32> },
    None,
}

#[derive(Debug, Clone)]
pub struct TranslationArtifact {
    pub translated_text: String,
    pub audio: AudioArtifact,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    pub voice: Option<String>,
    pub rate: Option<f32>,
}

/// Translate/synthesize/transcribe, each bounded by a deadline so a stalled
/// upstream never blocks a fan-out leg (§5, per-leg isolation).
#[async_trait::async_trait]
pub trait SpeechPipeline: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
        options: &SynthesisOptions,
    ) -> Result<TranslationArtifact, SpeechPipelineError>;

    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioArtifact, SpeechPipelineError>;

    async fn transcribe(
        &self,
        audio: &[u8],
        mime: &str,
        language: &str,
    ) -> Result<String, SpeechPipelineError>;
}

pub type SharedSpeechPipeline = std::sync::Arc<dyn SpeechPipeline>;

/// Default local implementation: "translation" is the identity function and
/// synthesis always defers to the client's own speech synthesis. This keeps
/// the crate runnable end to end without wiring a translation vendor, while
/// preserving every shape the real pipeline would produce.
pub struct EchoSpeechPipeline {
    call_timeout: Duration,
}

impl EchoSpeechPipeline {
    pub fn new(call_timeout: Duration) -> Self {
        Self { call_timeout }
    }
}

impl Default for EchoSpeechPipeline {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait::async_trait]
impl SpeechPipeline for EchoSpeechPipeline {
    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
        options: &SynthesisOptions,
    ) -> Result<TranslationArtifact, SpeechPipelineError> {
        let translated_text = text.to_string();
        let audio = timeout(self.call_timeout, self.synthesize(&translated_text, target_language, options))
            .await
            .map_err(|_| SpeechPipelineError::Timeout)??;
        Ok(TranslationArtifact { translated_text, audio })
    }

    async fn synthesize(
        &self,
        _text: &str,
        _language: &str,
        options: &SynthesisOptions,
    ) -> Result<AudioArtifact, SpeechPipelineError> {
        Ok(AudioArtifact::ClientSpeech {
            voice: options.voice.clone(),
            rate: options.rate,
        })
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        _mime: &str,
        _language: &str,
    ) -> Result<String, SpeechPipelineError> {
        if audio.is_empty() {
            return Err(SpeechPipelineError::Backend("empty audio payload".into()));
        }
        Ok(format!("[{} bytes of audio]", audio.len()))
    }
}
