use std::sync::OnceLock;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

mod log_config;
pub use log_config::LogConfig;

pub static CONFIG: OnceLock<ServerConfig> = OnceLock::new();

pub fn init() {
    let raw_config = Figment::new()
        .merge(Toml::file(
            Env::var("APP_CONFIG").as_deref().unwrap_or("config.toml"),
        ))
        .merge(Env::raw().only(&["database_url"]))
        .merge(Env::prefixed("APP_").global());

    let config = match raw_config.extract::<ServerConfig>() {
        Ok(s) => s,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            std::process::exit(1);
        }
    };
    if config.database_url.is_empty() {
        eprintln!("DATABASE_URL is not set");
        std::process::exit(1);
    }
    crate::config::CONFIG
        .set(config)
        .expect("config should be set");
}

pub fn get() -> &'static ServerConfig {
    CONFIG.get().expect("config should be set")
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    pub database_url: String,
    #[serde(default)]
    pub log: LogConfig,
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub session: SessionConfig,
    /// HS256 signing secret for teacher bearer tokens. Left unset in local
    /// dev: `main` generates an ephemeral one and logs a warning, since a
    /// restart would invalidate every outstanding token anyway.
    pub jwt_secret: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

/// Tunables for classroom-code TTL, health sweeps and drain grace.
///
/// Every field has a default so an empty `[session]` table (or no table at
/// all) in `config.toml` is valid.
#[derive(Deserialize, Clone, Debug)]
pub struct SessionConfig {
    #[serde(
        default = "default_classroom_code_expiration_secs",
        rename = "classroom_code_expiration_secs"
    )]
    classroom_code_expiration_secs: u64,
    #[serde(
        default = "default_classroom_code_cleanup_interval_secs",
        rename = "classroom_code_cleanup_interval_secs"
    )]
    classroom_code_cleanup_interval_secs: u64,
    #[serde(
        default = "default_health_check_interval_secs",
        rename = "health_check_interval_secs"
    )]
    health_check_interval_secs: u64,
    #[serde(
        default = "default_student_drain_grace_secs",
        rename = "student_drain_grace_secs"
    )]
    student_drain_grace_secs: u64,
}

impl SessionConfig {
    pub fn classroom_code_expiration(&self) -> Duration {
        Duration::from_secs(self.classroom_code_expiration_secs)
    }

    pub fn classroom_code_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.classroom_code_cleanup_interval_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn student_drain_grace(&self) -> Duration {
        Duration::from_secs(self.student_drain_grace_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            classroom_code_expiration_secs:
                default_classroom_code_expiration_secs(),
            classroom_code_cleanup_interval_secs:
                default_classroom_code_cleanup_interval_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            student_drain_grace_secs: default_student_drain_grace_secs(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_classroom_code_expiration_secs() -> u64 {
    2 * 60 * 60
}

fn default_classroom_code_cleanup_interval_secs() -> u64 {
    15 * 60
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_student_drain_grace_secs() -> u64 {
    60
}
