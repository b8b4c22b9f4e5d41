//! `register` handler (§4.3, §4.4): the only message exempt from the
//! "already registered" gate. Binds role/language/settings onto the peer and
//! turns the tentative session id assigned at connection-open into a
//! durable session (teacher) or joins an existing one (student).

use async_trait::async_trait;
use serde_json::Value;

use crate::classroom_code::ClassroomCode;
use crate::error::{STATUS_CODE_POLICY_VIOLATION, code};
use crate::registry::Role;
use crate::ws::handlers::{HandlerContext, MessageHandler};
use crate::ws::protocol::{OutboundFrame, RegisterAckData, RegisterRequest, StudentJoinedPayload};
use crate::ws::response::{self, ResponseWriter};

pub struct RegisterHandler;

#[async_trait]
impl MessageHandler for RegisterHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: Value) {
        let writer = ResponseWriter::new(ctx.peer);
        let req: RegisterRequest = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = ?err, "malformed register payload");
                writer.send_error_and_close(
                    "malformed register message",
                    code::MISSING_FIELD,
                    STATUS_CODE_POLICY_VIOLATION,
                );
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

        match req.role.as_deref() {
            Some("teacher") => self.register_teacher(ctx, &writer, &session_id, &req).await,
            Some("student") => self.register_student(ctx, &writer, &session_id, &req),
            _ => writer.send_error_and_close(
                "role must be 'teacher' or 'student'",
                code::MISSING_FIELD,
                STATUS_CODE_POLICY_VIOLATION,
            ),
        }
    }
}

impl RegisterHandler {
    async fn register_teacher(
        &self,
        ctx: &HandlerContext<'_>,
        writer: &ResponseWriter<'_>,
        tentative_session_id: &str,
        req: &RegisterRequest,
    ) {
        let token = req
            .teacher_token
            .clone()
            .or_else(|| req.teacher_id.map(|id| id.to_string()));
        let Some(token) = token else {
            writer.send_error_and_close(
                "teacherToken or teacherId required",
                code::INVALID_TEACHER_CREDENTIAL,
                STATUS_CODE_POLICY_VIOLATION,
            );
            return;
        };

        let mut conn = match crate::db::get() {
            Ok(conn) => conn,
            Err(err) => {
                tracing::error!(error = ?err, "db unavailable during teacher register");
                writer.send_error_and_close(
                    "database unavailable",
                    code::INTERNAL,
                    STATUS_CODE_POLICY_VIOLATION,
                );
                return;
            }
        };
        let identity = match ctx.state.authenticator.verify(&token, &mut conn) {
            Ok(identity) => identity,
            Err(err) => {
                tracing::debug!(error = ?err, "teacher auth failed");
                writer.send_error_and_close(
                    "invalid teacher credential",
                    code::INVALID_TEACHER_CREDENTIAL,
                    STATUS_CODE_POLICY_VIOLATION,
                );
                return;
            }
        };
        drop(conn);

        let language = req.language_code.clone().unwrap_or_else(|| "en".to_string());
        let session = match ctx.state.lifecycle.ensure_teacher_session(
            identity.teacher_id,
            &language,
            Some(tentative_session_id),
        ) {
            Ok(session) => session,
            Err(err) => {
                let wire_code = response::wire_code_for(&err);
                writer.send_error_and_close(err.to_string(), wire_code, STATUS_CODE_POLICY_VIOLATION);
                return;
            }
        };

        ctx.state.registry.bind_session(ctx.peer, session.id.clone());
        ctx.peer.set_role(Role::Teacher);
        ctx.peer.set_language(session.teacher_language.clone());
        if let Some(name) = &req.name {
            ctx.peer.set_name(name.clone());
        }
        if let Some(settings) = &req.settings {
            ctx.peer.merge_settings(settings);
        }

        let issued_code = ctx.state.classroom_codes.issue_or_refresh(&session.id);
        let expires_at_ms = expires_at_epoch_ms(&ctx.state.classroom_codes, issued_code);

        writer.send(&OutboundFrame::Register {
            status: "success",
            data: RegisterAckData {
                role: "teacher".to_string(),
                language_code: session.teacher_language.clone(),
                settings: ctx.peer.settings(),
            },
        });
        writer.send(&OutboundFrame::ClassroomCode {
            code: issued_code.to_string(),
            session_id: session.id.clone(),
            expires_at: expires_at_ms,
        });
    }

    /// `bound_session_id` is whatever the connection was already bound to
    /// when it opened (resolved from the `?code=` query param, or a
    /// throwaway id if it connected with none). A `classroomCode` on the
    /// message itself takes precedence and is validated the same way a
    /// query-string code would be (§4.4: "require a valid classroomCode").
    fn register_student(
        &self,
        ctx: &HandlerContext<'_>,
        writer: &ResponseWriter<'_>,
        bound_session_id: &str,
        req: &RegisterRequest,
    ) {
        let resolved_session_id = match &req.classroom_code {
            Some(raw) => {
                let valid = ClassroomCode::try_from(raw.as_str())
                    .ok()
                    .and_then(|code| ctx.state.classroom_codes.is_valid(code));
                match valid {
                    Some(session_id) => session_id,
                    None => {
                        writer.send_error_and_close(
                            "Classroom session expired or invalid",
                            code::INVALID_CLASSROOM,
                            STATUS_CODE_POLICY_VIOLATION,
                        );
                        return;
                    }
                }
            }
            None if ctx.state.classroom_codes.session_has_valid_code(bound_session_id) => {
                bound_session_id.to_string()
            }
            None => {
                writer.send_error_and_close(
                    "Classroom session expired or invalid",
                    code::INVALID_CLASSROOM,
                    STATUS_CODE_POLICY_VIOLATION,
                );
                return;
            }
        };

        if resolved_session_id != bound_session_id {
            ctx.state.registry.bind_session(ctx.peer, resolved_session_id.clone());
        }

        let language = req.language_code.clone().unwrap_or_else(|| "en".to_string());
        ctx.peer.set_role(Role::Student);
        ctx.peer.set_language(language.clone());
        if let Some(name) = &req.name {
            ctx.peer.set_name(name.clone());
        }
        if let Some(settings) = &req.settings {
            ctx.peer.merge_settings(settings);
        }

        // §3/§8: `counted` flips false->true at most once per peer, so a
        // repeated identical register (idempotence) never double-counts.
        if ctx.peer.mark_counted() {
            let class_code = ctx
                .state
                .classroom_codes
                .code_for_session(&resolved_session_id)
                .map(|c| c.to_string())
                .unwrap_or_else(|| resolved_session_id.clone());
            if let Err(err) = ctx.state.lifecycle.student_join(&resolved_session_id, &class_code) {
                tracing::warn!(error = ?err, session_id = %resolved_session_id, "failed to record student join");
            }
        }

        writer.send(&OutboundFrame::Register {
            status: "success",
            data: RegisterAckData {
                role: "student".to_string(),
                language_code: language.clone(),
                settings: ctx.peer.settings(),
            },
        });

        let (teachers, _) = ctx.state.registry.peers_in_session(&resolved_session_id);
        let notice = OutboundFrame::StudentJoined {
            payload: StudentJoinedPayload {
                name: req.name.clone(),
                language,
            },
        };
        for teacher in &teachers {
            ResponseWriter::new(teacher).send(&notice);
        }
    }
}

/// Classroom codes track expiry as a monotonic [`std::time::Instant`]; the
/// wire format wants a wall-clock epoch millis, so convert via the
/// remaining duration rather than the instant itself.
fn expires_at_epoch_ms(
    service: &crate::classroom_code::ClassroomCodeService,
    code: crate::classroom_code::ClassroomCode,
) -> i64 {
    let now_instant = std::time::Instant::now();
    let remaining = service
        .expires_at(code)
        .map(|at| at.saturating_duration_since(now_instant))
        .unwrap_or_default();
    (chrono::Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default()).timestamp_millis()
}
