//! End-to-end scenarios over the real dispatch path (§8): a peer is created
//! the same way [`crate::ws::connection::handle`] creates one, inbound JSON
//! is fed through [`router::dispatch`], and outbound frames are read back
//! off the peer's own mpsc channel — no socket, no global [`crate::ws::get`]
//! state, so every test builds (and owns) its own [`AppState`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::auth::CompositeTeacherAuthenticator;
use crate::classroom_code::ClassroomCodeService;
use crate::registry::{ConnectionRegistry, OutboundItem, PeerHandle, Role, OUTBOUND_CHANNEL_CAPACITY};
use crate::repository::DieselSessionRepository;
use crate::speech::{
    AudioArtifact, EchoSpeechPipeline, SpeechPipeline, SpeechPipelineError, SynthesisOptions,
    TranslationArtifact,
};
use crate::ws::handlers::{self, HandlerContext};
use crate::ws::lifecycle::SessionLifecycleService;
use crate::ws::router;
use crate::ws::AppState;

fn build_state(speech: Arc<dyn SpeechPipeline>) -> AppState {
    let registry = Arc::new(ConnectionRegistry::new());
    let classroom_codes = Arc::new(ClassroomCodeService::new(Duration::from_secs(3600)));
    let repository: crate::repository::SharedSessionRepository =
        Arc::new(DieselSessionRepository::new());
    let authenticator: crate::auth::SharedTeacherAuthenticator =
        Arc::new(CompositeTeacherAuthenticator::new(b"test-secret"));
    let lifecycle = Arc::new(SessionLifecycleService::new(
        registry.clone(),
        classroom_codes.clone(),
        repository.clone(),
        Duration::from_millis(50),
    ));

    AppState {
        registry,
        classroom_codes,
        repository,
        speech,
        authenticator,
        lifecycle,
        handlers: Arc::new(handlers::build_registry()),
    }
}

/// Mirrors the tentative-session-id bookkeeping `connection::handle` does at
/// socket-open time, minus the socket.
fn open_peer(state: &AppState) -> (PeerHandle, mpsc::Receiver<OutboundItem>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    let peer = state.registry.add(tx);
    state.registry.bind_session(&peer, Ulid::new().to_string());
    peer.mark_alive();
    (peer, rx)
}

async fn dispatch(state: &AppState, peer: &PeerHandle, frame: Value) {
    let ctx = HandlerContext { peer, state };
    router::dispatch(&state.handlers, &ctx, &frame.to_string()).await;
}

/// Drains exactly one outbound frame, parsed as JSON, failing the test if
/// none arrived.
async fn next_frame(rx: &mut mpsc::Receiver<OutboundItem>) -> Value {
    match tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame should arrive promptly")
        .expect("channel should not be closed")
    {
        OutboundItem::Frame(json) => serde_json::from_str(&json).expect("valid JSON frame"),
        other => panic!("expected a Frame item, got {other:?}"),
    }
}

fn no_frame_pending(rx: &mut mpsc::Receiver<OutboundItem>) -> bool {
    rx.try_recv().is_err()
}

#[tokio::test]
async fn teacher_register_then_two_students_fan_out_by_language() {
    crate::test_support::init_env();
    let teacher_id = crate::test_support::insert_teacher("teacher-fanout");
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));

    let (teacher, mut teacher_rx) = open_peer(&state);
    dispatch(
        &state,
        &teacher,
        json!({"type": "register", "role": "teacher", "languageCode": "en", "teacherId": teacher_id}),
    )
    .await;

    let register_ack = next_frame(&mut teacher_rx).await;
    assert_eq!(register_ack["type"], "register");
    assert_eq!(register_ack["status"], "success");
    assert_eq!(register_ack["data"]["role"], "teacher");

    let code_frame = next_frame(&mut teacher_rx).await;
    assert_eq!(code_frame["type"], "classroom_code");
    let code = code_frame["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);

    let (student_fr, mut fr_rx) = open_peer(&state);
    dispatch(
        &state,
        &student_fr,
        json!({"type": "register", "role": "student", "languageCode": "fr", "classroomCode": code}),
    )
    .await;
    let fr_ack = next_frame(&mut fr_rx).await;
    assert_eq!(fr_ack["status"], "success");
    let teacher_notice_fr = next_frame(&mut teacher_rx).await;
    assert_eq!(teacher_notice_fr["type"], "student_joined");
    assert_eq!(teacher_notice_fr["payload"]["language"], "fr");

    // §8 scenario 2: the durable session's studentsCount and classCode are
    // stamped as soon as the first student joins.
    let session_id = code_frame["sessionId"].as_str().unwrap().to_string();
    let mut conn = crate::db::get().expect("db connection");
    let session = state
        .repository
        .find_session(&mut conn, &session_id)
        .expect("query should succeed")
        .expect("session should exist");
    assert_eq!(session.students_count, 1);
    assert_eq!(session.class_code.as_deref(), Some(code.as_str()));
    drop(conn);

    let (student_es, mut es_rx) = open_peer(&state);
    dispatch(
        &state,
        &student_es,
        json!({"type": "register", "role": "student", "languageCode": "es", "classroomCode": code}),
    )
    .await;
    let es_ack = next_frame(&mut es_rx).await;
    assert_eq!(es_ack["status"], "success");
    let teacher_notice_es = next_frame(&mut teacher_rx).await;
    assert_eq!(teacher_notice_es["type"], "student_joined");
    assert_eq!(teacher_notice_es["payload"]["language"], "es");

    dispatch(&state, &teacher, json!({"type": "transcription", "text": "hello class"})).await;

    let fr_translation = next_frame(&mut fr_rx).await;
    assert_eq!(fr_translation["type"], "translation");
    assert_eq!(fr_translation["targetLanguage"], "fr");
    assert_eq!(fr_translation["originalText"], "hello class");
    assert!(no_frame_pending(&mut fr_rx));

    let es_translation = next_frame(&mut es_rx).await;
    assert_eq!(es_translation["type"], "translation");
    assert_eq!(es_translation["targetLanguage"], "es");
    assert!(no_frame_pending(&mut es_rx));

    // the teacher never gets a translation frame for its own utterance
    assert!(no_frame_pending(&mut teacher_rx));

    // §3: each successful leg appends an (append-only) Translation row, and
    // the durable session's totalTranslations tracks the distinct-language
    // count fanned out, both persisted on a background task (§4.6).
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut conn = crate::db::get().expect("db connection");
    let session = state
        .repository
        .find_session(&mut conn, &session_id)
        .expect("query should succeed")
        .expect("session should exist");
    assert_eq!(session.total_translations, 2);

    use diesel::prelude::*;
    let rows: Vec<String> = crate::schema::translations::table
        .filter(crate::schema::translations::session_id.eq(&session_id))
        .select(crate::schema::translations::target_language)
        .load(&mut conn)
        .expect("query translations");
    assert_eq!(rows.len(), 2);
    assert!(rows.contains(&"fr".to_string()));
    assert!(rows.contains(&"es".to_string()));
}

/// A speech pipeline that fails translation into one specific language,
/// so per-leg isolation (§4.6) can be exercised deterministically.
struct FlakyForLanguage {
    failing_language: String,
}

#[async_trait]
impl SpeechPipeline for FlakyForLanguage {
    async fn translate(
        &self,
        text: &str,
        _source_language: &str,
        target_language: &str,
        _options: &SynthesisOptions,
    ) -> Result<TranslationArtifact, SpeechPipelineError> {
        if target_language == self.failing_language {
            return Err(SpeechPipelineError::Backend("simulated upstream failure".into()));
        }
        Ok(TranslationArtifact {
            translated_text: text.to_string(),
            audio: AudioArtifact::None,
        })
    }

    async fn synthesize(
        &self,
        _text: &str,
        _language: &str,
        _options: &SynthesisOptions,
    ) -> Result<AudioArtifact, SpeechPipelineError> {
        Ok(AudioArtifact::None)
    }

    async fn transcribe(
        &self,
        _audio: &[u8],
        _mime: &str,
        _language: &str,
    ) -> Result<String, SpeechPipelineError> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn translation_failure_for_one_language_does_not_block_the_other() {
    crate::test_support::init_env();
    let teacher_id = crate::test_support::insert_teacher("teacher-flaky");
    let state = build_state(Arc::new(FlakyForLanguage { failing_language: "fr".to_string() }));

    let (teacher, mut teacher_rx) = open_peer(&state);
    dispatch(
        &state,
        &teacher,
        json!({"type": "register", "role": "teacher", "languageCode": "en", "teacherId": teacher_id}),
    )
    .await;
    let _ = next_frame(&mut teacher_rx).await; // register ack
    let code_frame = next_frame(&mut teacher_rx).await;
    let code = code_frame["code"].as_str().unwrap().to_string();

    let (student_fr, mut fr_rx) = open_peer(&state);
    dispatch(
        &state,
        &student_fr,
        json!({"type": "register", "role": "student", "languageCode": "fr", "classroomCode": code}),
    )
    .await;
    let _ = next_frame(&mut fr_rx).await;
    let _ = next_frame(&mut teacher_rx).await; // student_joined

    let (student_de, mut de_rx) = open_peer(&state);
    dispatch(
        &state,
        &student_de,
        json!({"type": "register", "role": "student", "languageCode": "de", "classroomCode": code}),
    )
    .await;
    let _ = next_frame(&mut de_rx).await;
    let _ = next_frame(&mut teacher_rx).await; // student_joined

    dispatch(&state, &teacher, json!({"type": "transcription", "text": "guten tag"})).await;

    // the failing leg still gets a frame, but with untranslated text
    let fr_frame = next_frame(&mut fr_rx).await;
    assert_eq!(fr_frame["type"], "translation");
    assert_eq!(fr_frame["text"], "guten tag");
    assert_eq!(fr_frame["originalText"], "guten tag");
    assert!(fr_frame.get("audioData").is_none());

    // the healthy leg is unaffected
    let de_frame = next_frame(&mut de_rx).await;
    assert_eq!(de_frame["type"], "translation");
    assert_eq!(de_frame["text"], "guten tag");
}

#[tokio::test]
async fn repeated_teacher_register_on_the_same_connection_yields_the_same_code() {
    crate::test_support::init_env();
    let teacher_id = crate::test_support::insert_teacher("teacher-reregister");
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));

    let (teacher, mut rx) = open_peer(&state);
    let register_msg = json!({
        "type": "register",
        "role": "teacher",
        "languageCode": "en",
        "teacherId": teacher_id,
    });

    dispatch(&state, &teacher, register_msg.clone()).await;
    let _ = next_frame(&mut rx).await; // register ack
    let first_code_frame = next_frame(&mut rx).await;
    let first_code = first_code_frame["code"].as_str().unwrap().to_string();
    let first_session_id = first_code_frame["sessionId"].as_str().unwrap().to_string();

    // §8 scenario 1: an identical second `register` on the still-open
    // connection must be idempotent and hand back the same code/session.
    dispatch(&state, &teacher, register_msg).await;
    let _ = next_frame(&mut rx).await;
    let second_code_frame = next_frame(&mut rx).await;

    assert_eq!(second_code_frame["code"], first_code);
    assert_eq!(second_code_frame["sessionId"], first_session_id);
}

#[tokio::test]
async fn student_join_rejected_with_invalid_classroom_code() {
    crate::test_support::init_env();
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));

    let (student, mut rx) = open_peer(&state);
    dispatch(
        &state,
        &student,
        json!({"type": "register", "role": "student", "languageCode": "fr", "classroomCode": "ZZZZZZ"}),
    )
    .await;

    let error_frame = next_frame(&mut rx).await;
    assert_eq!(error_frame["type"], "error");
    assert_eq!(error_frame["code"], "INVALID_CLASSROOM");

    // send_error_and_close queues the close right behind the error frame
    // through the same channel (§4.12); it must never overtake the error.
    match tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("close should arrive promptly")
        .expect("channel should not be closed")
    {
        OutboundItem::Close { code, .. } => assert_eq!(code, 1008),
        other => panic!("expected a Close item, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_session_gets_one_frame_then_a_close() {
    crate::test_support::init_env();
    let teacher_id = crate::test_support::insert_teacher("teacher-expired");
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));

    let (teacher, mut rx) = open_peer(&state);
    dispatch(
        &state,
        &teacher,
        json!({"type": "register", "role": "teacher", "languageCode": "en", "teacherId": teacher_id}),
    )
    .await;
    let _ = next_frame(&mut rx).await; // register ack
    let code_frame = next_frame(&mut rx).await;
    let session_id = code_frame["sessionId"].as_str().unwrap().to_string();

    // ended externally (or by drain) while the teacher's socket is still
    // open — the durable record is now `isActive=false`, but the classroom
    // code itself hasn't hit its own TTL.
    let mut conn = crate::db::get().expect("db connection");
    state.repository.end_session(&mut conn, &session_id).expect("end session");
    drop(conn);

    dispatch(&state, &teacher, json!({"type": "transcription", "text": "still talking"})).await;

    let expired_frame = next_frame(&mut rx).await;
    assert_eq!(expired_frame["type"], "session_expired");
    assert!(no_frame_pending(&mut rx));

    match tokio::time::timeout(Duration::from_millis(1500), rx.recv())
        .await
        .expect("close should arrive within the grace window")
        .expect("channel should not be closed")
    {
        OutboundItem::Close { code, .. } => assert_eq!(code, 1008),
        other => panic!("expected a Close item, got {other:?}"),
    }
}

#[tokio::test]
async fn settings_shallow_merges_and_acks() {
    crate::test_support::init_env();
    let teacher_id = crate::test_support::insert_teacher("teacher-settings");
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));

    let (teacher, mut rx) = open_peer(&state);
    dispatch(
        &state,
        &teacher,
        json!({"type": "register", "role": "teacher", "languageCode": "en", "teacherId": teacher_id}),
    )
    .await;
    let _ = next_frame(&mut rx).await;
    let _ = next_frame(&mut rx).await;

    dispatch(&state, &teacher, json!({"type": "settings", "ttsServiceType": "browser"})).await;
    let ack = next_frame(&mut rx).await;
    assert_eq!(ack["type"], "settings");
    assert_eq!(ack["status"], "success");
    assert_eq!(ack["settings"]["ttsServiceType"], "browser");

    dispatch(&state, &teacher, json!({"type": "settings", "settings": {"voice": "alto"}})).await;
    let ack2 = next_frame(&mut rx).await;
    // the earlier ttsServiceType key survives a settings patch that doesn't
    // mention it (§4.8 shallow merge).
    assert_eq!(ack2["settings"]["ttsServiceType"], "browser");
    assert_eq!(ack2["settings"]["voice"], "alto");
}

#[tokio::test]
async fn ping_is_answered_with_pong() {
    crate::test_support::init_env();
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));
    let (peer, mut rx) = open_peer(&state);

    dispatch(&state, &peer, json!({"type": "ping", "timestamp": 12345})).await;
    let pong = next_frame(&mut rx).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["originalTimestamp"], 12345);
    assert!(peer.take_alive());
}

#[tokio::test]
async fn student_alone_leaving_ends_session_immediately() {
    crate::test_support::init_env();
    let teacher_id = crate::test_support::insert_teacher("teacher-drain");
    let state = build_state(Arc::new(EchoSpeechPipeline::default()));

    let (teacher, mut teacher_rx) = open_peer(&state);
    dispatch(
        &state,
        &teacher,
        json!({"type": "register", "role": "teacher", "languageCode": "en", "teacherId": teacher_id}),
    )
    .await;
    let _ = next_frame(&mut teacher_rx).await;
    let code_frame = next_frame(&mut teacher_rx).await;
    let code = code_frame["code"].as_str().unwrap().to_string();
    let session_id = code_frame["sessionId"].as_str().unwrap().to_string();

    let (student, mut student_rx) = open_peer(&state);
    dispatch(
        &state,
        &student,
        json!({"type": "register", "role": "student", "languageCode": "fr", "classroomCode": code}),
    )
    .await;
    let _ = next_frame(&mut student_rx).await;
    let _ = next_frame(&mut teacher_rx).await;

    // both leave: registry first (mirroring connection::handle's teardown
    // order), then the lifecycle service is told about each disconnect.
    state.registry.remove(teacher.connection_id);
    state.lifecycle.handle_disconnect(&session_id, Role::Teacher);
    state.registry.remove(student.connection_id);
    state.lifecycle.handle_disconnect(&session_id, Role::Student);

    // end_session_immediate runs on a spawned task; give it a beat.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut conn = crate::db::get().expect("db connection");
    let session = state
        .repository
        .find_session(&mut conn, &session_id)
        .expect("query should succeed")
        .expect("session should exist");
    assert!(!session.is_active);
    assert!(session.end_time.is_some());
}
