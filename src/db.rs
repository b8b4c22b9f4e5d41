use std::sync::OnceLock;

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::{Connection, SqliteConnection};
use diesel_migrations::{
    EmbeddedMigrations, MigrationHarness, embed_migrations,
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

static POOL: OnceLock<Pool<ConnectionManager<SqliteConnection>>> =
    OnceLock::new();

pub fn init() {
    let config = crate::config::get();
    let manager = ConnectionManager::<SqliteConnection>::new(
        config.database_url.clone(),
    );
    let pool = Pool::builder()
        .build(manager)
        .expect("db pool should build");
    migrate(&pool);
    POOL.set(pool).expect("db pool should only be set once");
}

fn migrate(pool: &Pool<ConnectionManager<SqliteConnection>>) {
    let mut conn = pool.get().expect("db connect should work");
    conn.run_pending_migrations(MIGRATIONS)
        .expect("migrations should run cleanly");
}

/// Get a pooled connection.
///
/// Only fails if the pool is exhausted or the underlying connection can't be
/// established; never blocks the fan-out path directly since every call site
/// treats the error as a `PersistenceError` (see `error::AppError`).
pub fn get() -> Result<DbConn, diesel::r2d2::PoolError> {
    POOL.get().expect("db pool should be initialized").get()
}

#[allow(dead_code)]
pub fn connect(database_url: &str) -> Result<SqliteConnection, diesel::ConnectionError> {
    SqliteConnection::establish(database_url)
}
