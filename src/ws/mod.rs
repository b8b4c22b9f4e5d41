//! Core relay engine: session registry, routing, fan-out and lifecycle.
//! Everything here is transport-agnostic except [`connection::run`], which is
//! the only place that touches a `salvo::websocket::WebSocket` directly.

pub mod connection;
#[cfg(test)]
mod engine_tests;
pub mod fanout;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod protocol;
pub mod response;
pub mod router;

use std::sync::Arc;
use std::sync::OnceLock;

use crate::auth::SharedTeacherAuthenticator;
use crate::classroom_code::ClassroomCodeService;
use crate::registry::ConnectionRegistry;
use crate::repository::SharedSessionRepository;
use crate::speech::SharedSpeechPipeline;

/// Everything a connection/handler/fan-out task needs, assembled once in
/// `main` and shared by `Arc` the way the teacher wires its `StreamManager`
/// and db pool into request state.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub classroom_codes: Arc<ClassroomCodeService>,
    pub repository: SharedSessionRepository,
    pub speech: SharedSpeechPipeline,
    pub authenticator: SharedTeacherAuthenticator,
    pub lifecycle: Arc<lifecycle::SessionLifecycleService>,
    pub handlers: Arc<handlers::HandlerRegistry>,
}

pub type SharedAppState = Arc<AppState>;

static STATE: OnceLock<SharedAppState> = OnceLock::new();

pub fn init(state: SharedAppState) {
    STATE.set(state).expect("app state should be set once");
}

pub fn get() -> SharedAppState {
    STATE.get().expect("app state should be initialized").clone()
}
