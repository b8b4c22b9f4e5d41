//! Shared setup for the engine integration tests (`ws::engine_tests`). Kept
//! in one place because `config::init()`/`db::init()` each populate a
//! process-wide `OnceLock` and panic on a second call — every test module in
//! this binary must funnel through the same [`std::sync::Once`]-guarded
//! [`init_env`] rather than calling those directly.

use std::sync::Once;

static INIT: Once = Once::new();

/// Brings up config + a throwaway sqlite file once per test binary. The temp
/// file is intentionally leaked for the process lifetime (a `NamedTempFile`
/// dropped here would delete the database out from under later tests).
pub fn init_env() {
    INIT.call_once(|| {
        let db_file = tempfile::NamedTempFile::new().expect("create temp sqlite file");
        let db_path = db_file.path().to_str().expect("utf8 temp path").to_string();
        std::mem::forget(db_file);

        // SAFETY: runs once, before any other thread in the test binary
        // reads these vars (config::init/db::init only happen here).
        unsafe {
            std::env::set_var("DATABASE_URL", &db_path);
            std::env::set_var("APP_CONFIG", "/dev/null");
        }

        crate::config::init();
        crate::db::init();
    });
}

/// Inserts a teacher user directly (bypassing the auth adapter's lookup
/// path, which only ever reads) and returns its durable id.
pub fn insert_teacher(username: &str) -> i32 {
    use diesel::prelude::*;

    use crate::models::NewTeacherUser;
    use crate::schema::teacher_users;

    let mut conn = crate::db::get().expect("db connection");
    let password_hash = crate::auth::password::hash("not-a-real-password").expect("hash");
    diesel::insert_into(teacher_users::table)
        .values(NewTeacherUser {
            username: username.to_string(),
            password_hash,
            created_at: chrono::Utc::now().naive_utc(),
        })
        .execute(&mut conn)
        .expect("insert teacher user");

    teacher_users::table
        .filter(teacher_users::username.eq(username))
        .select(teacher_users::id)
        .first(&mut conn)
        .expect("read back teacher id")
}
