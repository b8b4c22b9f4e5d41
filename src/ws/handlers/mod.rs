//! Per-message handlers (§4.3, §9 "handler-registry dispatch, no
//! reflection"). Each handler owns exactly one inbound `type` tag and is
//! looked up by string from [`build_registry`]; the router never matches on
//! the tag itself beyond the exempt-set check.

mod audio;
mod ping_pong;
mod register;
mod settings;
mod transcription;
mod tts_request;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::registry::PeerHandle;
use crate::ws::AppState;

/// Borrowed view handed to every handler: the peer that sent the message and
/// the shared engine state. Handlers never hold their own clone of `AppState`
/// across an `.await` boundary beyond what they need for a single message.
pub struct HandlerContext<'a> {
    pub peer: &'a PeerHandle,
    pub state: &'a AppState,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: serde_json::Value);
}

pub type HandlerRegistry = HashMap<&'static str, Box<dyn MessageHandler>>;

/// Tags that bypass the "must be registered with a live session" gate
/// (§4.3): `register` is how a peer becomes registered in the first place,
/// and `ping`/`pong` are liveness traffic that must work even mid-handshake.
pub const EXEMPT_TAGS: &[&str] = &["register", "ping", "pong"];

pub fn build_registry() -> HandlerRegistry {
    let mut registry: HandlerRegistry = HashMap::new();
    registry.insert("register", Box::new(register::RegisterHandler));
    registry.insert("transcription", Box::new(transcription::TranscriptionHandler));
    registry.insert("audio", Box::new(audio::AudioHandler));
    registry.insert("tts_request", Box::new(tts_request::TtsRequestHandler));
    registry.insert("settings", Box::new(settings::SettingsHandler));
    registry.insert("ping", Box::new(ping_pong::PingHandler));
    registry.insert("pong", Box::new(ping_pong::PongHandler));
    registry
}
