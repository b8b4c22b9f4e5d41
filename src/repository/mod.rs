//! Durable session/transcript/translation/user store (§3, §4.14 referenced
//! from `auth`). Backed by Diesel + SQLite per the teacher's `schema.rs`/
//! `models.rs` split, accessed only through the [`SessionRepository`] trait
//! so the WS layer never touches a connection directly.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use std::sync::Arc;
use ulid::Ulid;

use crate::db::DbConn;
use crate::models::{
    ClassSession, NewClassSession, NewTranscript, NewTranslation, Transcript,
    Translation,
};

pub type RepoResult<T> = Result<T, diesel::result::Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionQuality {
    Real,
    TooShort,
    NoStudents,
    NoActivity,
    Dead,
}

impl SessionQuality {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Classification thresholds from §4.11, evaluated at session-end time.
    pub fn classify(
        students_count: i32,
        total_translations: i32,
        duration_secs: i64,
    ) -> Self {
        if duration_secs < 30 {
            SessionQuality::TooShort
        } else if students_count == 0 {
            SessionQuality::NoStudents
        } else if total_translations == 0 {
            SessionQuality::NoActivity
        } else if students_count > 0 && total_translations > 0 {
            SessionQuality::Real
        } else {
            SessionQuality::Dead
        }
    }
}

/// Narrow persistence contract consumed by the session-lifecycle and
/// fan-out services. Every method is best-effort from the caller's point of
/// view: a `RepoResult::Err` is logged and swallowed at the call site,
/// never allowed to block a broadcast (§7, PersistenceError).
pub trait SessionRepository: Send + Sync {
    fn create_session(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        teacher_id: i32,
        teacher_language: &str,
    ) -> RepoResult<ClassSession>;

    fn find_session(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<Option<ClassSession>>;

    fn find_active_session_for_teacher(
        &self,
        conn: &mut DbConn,
        teacher_id: i32,
    ) -> RepoResult<Option<ClassSession>>;

    fn set_class_code(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        class_code: &str,
    ) -> RepoResult<()>;

    fn touch_activity(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()>;

    fn increment_students(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()>;

    fn decrement_students(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()>;

    fn record_translations(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        distinct_language_count: i32,
    ) -> RepoResult<()>;

    fn end_session(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()>;

    fn record_transcript(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        text: &str,
        language: &str,
    ) -> RepoResult<Transcript>;

    fn record_translation(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        source_language: &str,
        target_language: &str,
        original_text: &str,
        translated_text: &str,
        latency_ms: i32,
    ) -> RepoResult<Translation>;

    fn count_active(&self, conn: &mut DbConn) -> RepoResult<i64>;
}

pub type SharedSessionRepository = Arc<dyn SessionRepository>;

pub struct DieselSessionRepository;

impl DieselSessionRepository {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DieselSessionRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

impl SessionRepository for DieselSessionRepository {
    fn create_session(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        teacher_id: i32,
        teacher_language: &str,
    ) -> RepoResult<ClassSession> {
        use crate::schema::class_sessions::dsl::*;

        let ts = now();
        let new_session = NewClassSession {
            id: session_id.to_string(),
            teacher_id,
            teacher_language: teacher_language.to_string(),
            start_time: ts,
            last_activity_at: ts,
        };
        diesel::insert_into(class_sessions)
            .values(&new_session)
            .execute(conn)?;
        class_sessions.filter(id.eq(session_id)).first(conn)
    }

    fn find_session(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<Option<ClassSession>> {
        use crate::schema::class_sessions::dsl::*;
        class_sessions
            .filter(id.eq(session_id))
            .first(conn)
            .optional()
    }

    fn find_active_session_for_teacher(
        &self,
        conn: &mut DbConn,
        teacher: i32,
    ) -> RepoResult<Option<ClassSession>> {
        use crate::schema::class_sessions::dsl::*;
        class_sessions
            .filter(teacher_id.eq(teacher))
            .filter(is_active.eq(true))
            .order(start_time.desc())
            .first(conn)
            .optional()
    }

    fn set_class_code(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        code: &str,
    ) -> RepoResult<()> {
        use crate::schema::class_sessions::dsl::*;
        // §3: "classCode once set is immutable" — only the first join ever
        // writes it, a later join with a refreshed code must not overwrite it.
        diesel::update(class_sessions.filter(id.eq(session_id)).filter(class_code.is_null()))
            .set(class_code.eq(code))
            .execute(conn)?;
        Ok(())
    }

    fn touch_activity(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()> {
        use crate::schema::class_sessions::dsl::*;
        diesel::update(class_sessions.filter(id.eq(session_id)))
            .set(last_activity_at.eq(now()))
            .execute(conn)?;
        Ok(())
    }

    fn increment_students(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()> {
        use crate::schema::class_sessions::dsl::*;
        diesel::update(class_sessions.filter(id.eq(session_id)))
            .set((
                students_count.eq(students_count + 1),
                last_activity_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn decrement_students(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()> {
        use crate::schema::class_sessions::dsl::*;
        let session: ClassSession =
            class_sessions.filter(id.eq(session_id)).first(conn)?;
        let floored = (session.students_count - 1).max(0);
        diesel::update(class_sessions.filter(id.eq(session_id)))
            .set(students_count.eq(floored))
            .execute(conn)?;
        Ok(())
    }

    fn record_translations(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        distinct_language_count: i32,
    ) -> RepoResult<()> {
        use crate::schema::class_sessions::dsl::*;
        diesel::update(class_sessions.filter(id.eq(session_id)))
            .set((
                total_translations.eq(total_translations + distinct_language_count),
                last_activity_at.eq(now()),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn end_session(
        &self,
        conn: &mut DbConn,
        session_id: &str,
    ) -> RepoResult<()> {
        use crate::schema::class_sessions::dsl::*;

        let session: ClassSession =
            class_sessions.filter(id.eq(session_id)).first(conn)?;
        if !session.is_active {
            return Ok(());
        }

        let ended_at = now();
        let duration_secs =
            (ended_at - session.start_time).num_seconds().max(0);
        let quality_value = SessionQuality::classify(
            session.students_count,
            session.total_translations,
            duration_secs,
        );

        diesel::update(class_sessions.filter(id.eq(session_id)))
            .set((
                is_active.eq(false),
                end_time.eq(Some(ended_at)),
                last_activity_at.eq(ended_at),
                quality.eq(Some(quality_value.as_str())),
                quality_reason.eq(Some(format!(
                    "students={} translations={} duration_secs={}",
                    session.students_count,
                    session.total_translations,
                    duration_secs
                ))),
            ))
            .execute(conn)?;
        Ok(())
    }

    fn record_transcript(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        text: &str,
        language: &str,
    ) -> RepoResult<Transcript> {
        use crate::schema::transcripts::dsl::*;

        let new_transcript = NewTranscript {
            id: Ulid::new().to_string(),
            session_id: session_id.to_string(),
            text: text.to_string(),
            language: language.to_string(),
            created_at: now(),
        };
        diesel::insert_into(transcripts)
            .values(&new_transcript)
            .execute(conn)?;
        transcripts.filter(id.eq(&new_transcript.id)).first(conn)
    }

    fn record_translation(
        &self,
        conn: &mut DbConn,
        session_id: &str,
        source_language: &str,
        target_language: &str,
        original_text: &str,
        translated_text: &str,
        latency_ms: i32,
    ) -> RepoResult<Translation> {
        use crate::schema::translations::dsl::*;

        let new_translation = NewTranslation {
            id: Ulid::new().to_string(),
            session_id: session_id.to_string(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            original_text: original_text.to_string(),
            translated_text: translated_text.to_string(),
            latency_ms,
            created_at: now(),
        };
        diesel::insert_into(translations)
            .values(&new_translation)
            .execute(conn)?;
        translations.filter(id.eq(&new_translation.id)).first(conn)
    }

    fn count_active(&self, conn: &mut DbConn) -> RepoResult<i64> {
        use crate::schema::class_sessions::dsl::*;
        class_sessions
            .filter(is_active.eq(true))
            .count()
            .get_result(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_classification_thresholds() {
        assert_eq!(SessionQuality::classify(2, 3, 45), SessionQuality::Real);
        assert_eq!(SessionQuality::classify(2, 3, 10), SessionQuality::TooShort);
        assert_eq!(SessionQuality::classify(0, 0, 60), SessionQuality::NoStudents);
        assert_eq!(SessionQuality::classify(3, 0, 60), SessionQuality::NoActivity);
    }
}
