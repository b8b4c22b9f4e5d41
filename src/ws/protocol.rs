//! Inbound/outbound WS frame shapes (§6). Inbound frames are parsed loosely
//! (each handler pulls its own fields out of a `serde_json::Value`, so a
//! malformed payload for one message type never prevents the router from
//! recognizing the `type` tag); outbound frames are strongly typed so a
//! field can't be silently misspelled at a send site.

use serde::{Deserialize, Serialize};

use crate::registry::PeerSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub role: Option<String>,
    #[serde(rename = "languageCode")]
    pub language_code: Option<String>,
    pub name: Option<String>,
    pub settings: Option<PeerSettings>,
    #[serde(rename = "classroomCode")]
    pub classroom_code: Option<String>,
    #[serde(rename = "teacherId")]
    pub teacher_id: Option<i32>,
    #[serde(rename = "teacherToken")]
    pub teacher_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionRequest {
    pub text: String,
    #[serde(rename = "languageCode")]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioRequest {
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsRequestFrame {
    pub text: Option<String>,
    #[serde(rename = "languageCode")]
    pub language_code: Option<String>,
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsRequest {
    pub settings: Option<PeerSettings>,
    #[serde(rename = "ttsServiceType")]
    pub tts_service_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingFrame {
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyComponents {
    pub translation: i64,
    pub tts: i64,
    pub processing: i64,
    pub network: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Latency {
    pub total: i64,
    pub components: LatencyComponents,
}

impl Latency {
    pub fn new(translation_ms: i64, tts_ms: i64, processing_ms: i64) -> Self {
        Self {
            total: translation_ms + tts_ms + processing_ms,
            components: LatencyComponents {
                translation: translation_ms,
                tts: tts_ms,
                processing: processing_ms,
                network: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterAckData {
    pub role: String,
    #[serde(rename = "languageCode")]
    pub language_code: String,
    pub settings: PeerSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentJoinedPayload {
    pub name: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
}

/// Every outbound frame shape from §6, tagged by `type`. Field names are
/// explicitly renamed to match the wire's camelCase convention rather than
/// relying on a blanket `rename_all`, since each variant's shape is bespoke.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Connection {
        status: &'static str,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "classroomCode", skip_serializing_if = "Option::is_none")]
        classroom_code: Option<String>,
    },
    ClassroomCode {
        code: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "expiresAt")]
        expires_at: i64,
    },
    Register {
        status: &'static str,
        data: RegisterAckData,
    },
    Translation {
        text: String,
        #[serde(rename = "originalText")]
        original_text: String,
        #[serde(rename = "sourceLanguage")]
        source_language: String,
        #[serde(rename = "targetLanguage")]
        target_language: String,
        #[serde(rename = "ttsServiceType", skip_serializing_if = "Option::is_none")]
        tts_service_type: Option<String>,
        #[serde(rename = "audioData", skip_serializing_if = "Option::is_none")]
        audio_data: Option<String>,
        #[serde(rename = "useClientSpeech", skip_serializing_if = "Option::is_none")]
        use_client_speech: Option<bool>,
        #[serde(rename = "speechParams", skip_serializing_if = "Option::is_none")]
        speech_params: Option<SpeechParams>,
        latency: Latency,
    },
    TtsResponse {
        status: &'static str,
        #[serde(rename = "audioData", skip_serializing_if = "Option::is_none")]
        audio_data: Option<String>,
        #[serde(rename = "useClientSpeech", skip_serializing_if = "Option::is_none")]
        use_client_speech: Option<bool>,
        #[serde(rename = "speechParams", skip_serializing_if = "Option::is_none")]
        speech_params: Option<SpeechParams>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorBody>,
    },
    StudentJoined {
        payload: StudentJoinedPayload,
    },
    Pong {
        timestamp: i64,
        #[serde(rename = "originalTimestamp", skip_serializing_if = "Option::is_none")]
        original_timestamp: Option<i64>,
    },
    Ping {
        timestamp: i64,
    },
    Settings {
        status: &'static str,
        settings: PeerSettings,
    },
    SessionExpired {},
    Error {
        message: String,
        code: &'static str,
    },
}

impl OutboundFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            tracing::error!(error = ?err, "failed to serialize outbound frame, this is a bug");
            "{\"type\":\"error\",\"message\":\"internal serialization error\",\"code\":\"INTERNAL\"}".to_string()
        })
    }
}
