//! Session lifecycle orchestration (§4.4, §4.11): who owns a session, when a
//! disconnect is just a blip versus the end of a session, and the quality
//! classification that runs when it truly ends. Grace timers follow the same
//! cancellable-background-task shape as
//! [`crate::classroom_code::ClassroomCodeCleanup`], one per session instead
//! of one global sweep.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::classroom_code::ClassroomCodeService;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::ClassSession;
use crate::registry::{ConnectionRegistry, Role};
use crate::repository::SharedSessionRepository;

/// Coordinates session ownership, student join/leave bookkeeping and the
/// grace-timer-gated session-end path. Holds no peer state directly; it
/// reads the live [`ConnectionRegistry`] to decide whether a session is
/// truly empty before ending it.
pub struct SessionLifecycleService {
    registry: Arc<ConnectionRegistry>,
    classroom_codes: Arc<ClassroomCodeService>,
    repository: SharedSessionRepository,
    drain_grace: Duration,
    grace_timers: DashMap<String, JoinHandle<()>>,
}

impl SessionLifecycleService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        classroom_codes: Arc<ClassroomCodeService>,
        repository: SharedSessionRepository,
        drain_grace: Duration,
    ) -> Self {
        Self {
            registry,
            classroom_codes,
            repository,
            drain_grace,
            grace_timers: DashMap::new(),
        }
    }

    /// First connection for a teacher creates the durable session; a
    /// reconnect with the same `session_id` is allowed, a reconnect
    /// claiming someone else's `session_id` is rejected (§4.4).
    pub fn ensure_teacher_session(
        &self,
        teacher_id: i32,
        teacher_language: &str,
        requested_session_id: Option<&str>,
    ) -> AppResult<ClassSession> {
        let mut conn = db::get()?;

        if let Some(session_id) = requested_session_id {
            if let Some(session) = self.repository.find_session(&mut conn, session_id)? {
                if session.teacher_id != teacher_id {
                    return Err(AppError::SessionOwnedByAnotherTeacher {
                        session_id: session_id.to_string(),
                    });
                }
                self.cancel_grace(session_id);
                self.classroom_codes.mark_teacher_reconnected(session_id);
                return Ok(session);
            }
        }

        if let Some(existing) =
            self.repository.find_active_session_for_teacher(&mut conn, teacher_id)?
        {
            self.cancel_grace(&existing.id);
            self.classroom_codes.mark_teacher_reconnected(&existing.id);
            return Ok(existing);
        }

        // `requested_session_id` is the tentative id the connection was
        // opened with (§4.4): using it here instead of minting a new one
        // keeps the id in the earlier `connection` ack frame durable rather
        // than orphaning it.
        let session_id = requested_session_id
            .map(str::to_string)
            .unwrap_or_else(|| Ulid::new().to_string());
        let session =
            self.repository
                .create_session(&mut conn, &session_id, teacher_id, teacher_language)?;
        Ok(session)
    }

    /// Bookkeeping for a newly-joined student: bumps the durable counter,
    /// stamps the durable session's `classCode` the first time one joins
    /// (§3: "classCode nullable until student joins... once set,
    /// immutable" — `set_class_code` is only ever called with the one code
    /// that resolved this join, so repeated calls are idempotent), and
    /// cancels any pending end-of-session grace timer (§4.11: joining is
    /// activity, it must not race a timer that's about to end the session).
    pub fn student_join(&self, session_id: &str, class_code: &str) -> AppResult<()> {
        self.cancel_grace(session_id);
        let mut conn = db::get()?;
        self.repository.increment_students(&mut conn, session_id)?;
        self.repository.set_class_code(&mut conn, session_id, class_code)?;
        Ok(())
    }

    /// Called once per disconnecting peer, after it has already been removed
    /// from the [`ConnectionRegistry`]. The four cases from §4.11:
    /// - student leaves, a teacher remains -> arm a grace timer ("all
    ///   students disconnected"), since a quick rejoin shouldn't end the
    ///   session.
    /// - student leaves, no one remains -> end immediately, no grace.
    /// - teacher leaves, no one remains -> end immediately, no grace.
    /// - teacher leaves, students remain -> leave the session open; only
    ///   `teacherConnected` flips, no timer at all.
    pub fn handle_disconnect(&self, session_id: &str, role: Role) {
        if role == Role::Student {
            let repo = self.repository.clone();
            let session_id_owned = session_id.to_string();
            tokio::spawn(async move {
                if let Ok(mut conn) = db::get() {
                    if let Err(err) = repo.decrement_students(&mut conn, &session_id_owned) {
                        tracing::warn!(error = ?err, session_id = %session_id_owned, "failed to decrement student count");
                    }
                }
            });
        } else if role == Role::Teacher {
            self.classroom_codes.mark_teacher_disconnected(session_id);
        }

        let (teachers, students) = self.registry.count_by_role(session_id);
        match role {
            Role::Student => {
                if teachers == 0 && students == 0 {
                    self.end_session_immediate(session_id);
                } else if students == 0 {
                    self.schedule_grace_end(session_id);
                }
            }
            Role::Teacher => {
                if teachers == 0 && students == 0 {
                    self.end_session_immediate(session_id);
                }
                // teachers==0 && students>0: session stays open, no timer.
            }
            Role::Unset => {}
        }
    }

    /// Ends a session with no grace period, for the "nobody at all is left"
    /// cases where waiting out the drain grace would just delay the
    /// inevitable.
    fn end_session_immediate(&self, session_id: &str) {
        self.cancel_grace(session_id);
        let session_id = session_id.to_string();
        let repository = self.repository.clone();
        tokio::spawn(async move {
            match db::get() {
                Ok(mut conn) => {
                    if let Err(err) = repository.end_session(&mut conn, &session_id) {
                        tracing::warn!(error = ?err, session_id, "failed to end session immediately");
                    } else {
                        tracing::info!(session_id, "session ended immediately, no one left");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = ?err, session_id, "db unavailable while ending session immediately");
                }
            }
        });
    }

    fn schedule_grace_end(&self, session_id: &str) {
        let session_id = session_id.to_string();
        let registry = self.registry.clone();
        let repository = self.repository.clone();
        let grace = self.drain_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let (teachers, students) = registry.count_by_role(&session_id);
            if teachers > 0 || students > 0 {
                return;
            }
            match db::get() {
                Ok(mut conn) => {
                    if let Err(err) = repository.end_session(&mut conn, &session_id) {
                        tracing::warn!(error = ?err, session_id, "failed to end drained session");
                    } else {
                        tracing::info!(session_id, "session ended after drain grace");
                    }
                }
                Err(err) => {
                    tracing::warn!(error = ?err, session_id, "db unavailable while ending drained session");
                }
            }
        });
        if let Some((_, previous)) = self.grace_timers.remove(&session_id) {
            previous.abort();
        }
        self.grace_timers.insert(session_id, handle);
    }

    fn cancel_grace(&self, session_id: &str) {
        if let Some((_, handle)) = self.grace_timers.remove(session_id) {
            handle.abort();
        }
    }

    /// Explicit end, for a future `endSession` control message or admin
    /// action; classification happens synchronously inside the repository
    /// call (§9's resolved Open Question).
    pub fn end_session(&self, session_id: &str) -> AppResult<()> {
        self.cancel_grace(session_id);
        let mut conn = db::get()?;
        self.repository.end_session(&mut conn, session_id)?;
        Ok(())
    }
}
