use chrono::NaiveDateTime;
use diesel::prelude::*;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::teacher_users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TeacherUser {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::teacher_users)]
pub struct NewTeacherUser {
    pub username: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = crate::schema::class_sessions)]
#[diesel(belongs_to(TeacherUser, foreign_key = teacher_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ClassSession {
    pub id: String,
    pub class_code: Option<String>,
    pub teacher_id: i32,
    pub teacher_language: String,
    pub students_count: i32,
    pub total_translations: i32,
    pub start_time: NaiveDateTime,
    pub last_activity_at: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub is_active: bool,
    pub quality: Option<String>,
    pub quality_reason: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::class_sessions)]
pub struct NewClassSession {
    pub id: String,
    pub teacher_id: i32,
    pub teacher_language: String,
    pub start_time: NaiveDateTime,
    pub last_activity_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = crate::schema::transcripts)]
#[diesel(belongs_to(ClassSession, foreign_key = session_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Transcript {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub language: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::transcripts)]
pub struct NewTranscript {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub language: String,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = crate::schema::translations)]
#[diesel(belongs_to(ClassSession, foreign_key = session_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Translation {
    pub id: String,
    pub session_id: String,
    pub source_language: String,
    pub target_language: String,
    pub original_text: String,
    pub translated_text: String,
    pub latency_ms: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::translations)]
pub struct NewTranslation {
    pub id: String,
    pub session_id: String,
    pub source_language: String,
    pub target_language: String,
    pub original_text: String,
    pub translated_text: String,
    pub latency_ms: i32,
    pub created_at: NaiveDateTime,
}
