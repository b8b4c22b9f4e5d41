use std::sync::Arc;

use salvo::catcher::Catcher;
use salvo::conn::rustls::{Keycert, RustlsConfig};
use salvo::prelude::*;
use salvo::server::ServerHandle;
use tokio::signal;
use tracing::info;

mod auth;
mod classroom_code;
mod config;
mod db;
mod error;
mod models;
mod registry;
mod repository;
mod routers;
mod schema;
mod speech;
#[cfg(test)]
mod test_support;
mod utils;
mod validate;
mod ws;

pub use error::AppError;

use crate::auth::CompositeTeacherAuthenticator;
use crate::classroom_code::{ClassroomCodeCleanup, ClassroomCodeService};
use crate::registry::ConnectionRegistry;
use crate::repository::DieselSessionRepository;
use crate::speech::EchoSpeechPipeline;
use crate::ws::health::HealthMonitor;
use crate::ws::lifecycle::SessionLifecycleService;
use crate::ws::{AppState, handlers};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    crate::config::init();
    let config = crate::config::get();
    crate::db::init();

    let _guard = config.log.guard();
    tracing::info!("log level: {}", &config.log.filter_level);

    let registry = Arc::new(ConnectionRegistry::new());
    let classroom_codes = Arc::new(ClassroomCodeService::new(
        config.session.classroom_code_expiration(),
    ));
    let repository: crate::repository::SharedSessionRepository =
        Arc::new(DieselSessionRepository::new());
    let speech: crate::speech::SharedSpeechPipeline = Arc::new(EchoSpeechPipeline::default());
    let authenticator: crate::auth::SharedTeacherAuthenticator =
        Arc::new(CompositeTeacherAuthenticator::new(&jwt_secret()));
    let lifecycle = Arc::new(SessionLifecycleService::new(
        registry.clone(),
        classroom_codes.clone(),
        repository.clone(),
        config.session.student_drain_grace(),
    ));

    crate::ws::init(Arc::new(AppState {
        registry: registry.clone(),
        classroom_codes: classroom_codes.clone(),
        repository,
        speech,
        authenticator,
        lifecycle,
        handlers: Arc::new(handlers::build_registry()),
    }));

    let health_monitor = HealthMonitor::spawn(registry, config.session.health_check_interval());
    let code_cleanup =
        ClassroomCodeCleanup::spawn(classroom_codes, config.session.classroom_code_cleanup_interval());
    crate::utils::limiter::periodic_rate_limit_report();

    let service = Service::new(routers::root()).catcher(Catcher::default());
    let listen_addr = &config.listen_addr;
    let port = config.listen_port;

    if let Some(tls) = &config.tls {
        println!(
            "🚀 Server listening on wss://{}:{port}/ws",
            listen_addr.replace("0.0.0.0", "127.0.0.1"),
        );
        let (cert, key) = tokio::join!(tokio::fs::read(&tls.cert), tokio::fs::read(&tls.key));
        let cert = cert.expect("valid cert.pem path must be provided");
        let key = key.expect("valid key.pem path must be provided");
        let rustls_config = RustlsConfig::new(Keycert::new().cert(cert).key(key));
        let acceptor = TcpListener::new((listen_addr.as_str(), port))
            .rustls(rustls_config)
            .bind()
            .await;
        let server = Server::new(acceptor);
        tokio::spawn(shutdown_signal(server.handle()));
        server.serve(service).await;
    } else {
        println!(
            "🚀 Server listening on ws://{}:{port}/ws",
            listen_addr.replace("0.0.0.0", "127.0.0.1"),
        );
        let acceptor = TcpListener::new((listen_addr.as_str(), port)).bind().await;
        let server = Server::new(acceptor);
        tokio::spawn(shutdown_signal(server.handle()));
        server.serve(service).await;
    }

    health_monitor.cancel();
    code_cleanup.cancel();
}

/// Resolves the HS256 signing secret for teacher bearer tokens: the
/// configured value if present, else a per-process random secret (the
/// teacher's own `JWT_SECRET: LazyLock<[u8; 32]> = LazyLock::new(rand::random)`
/// generalized to prefer a configured value so secrets can survive a
/// restart when one is actually provided).
fn jwt_secret() -> Vec<u8> {
    match &crate::config::get().jwt_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            tracing::warn!(
                "jwt_secret not configured, generating an ephemeral one; \
                 outstanding teacher tokens will stop verifying across a restart"
            );
            rand::random::<[u8; 32]>().to_vec()
        }
    }
}

async fn shutdown_signal(handle: ServerHandle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl_c signal received"),
        _ = terminate => info!("terminate signal received"),
    }
    handle.stop_graceful(std::time::Duration::from_secs(60));
}

#[cfg(test)]
mod tests {
    use salvo::prelude::*;
    use salvo::test::TestClient;

    use crate::config;

    #[tokio::test]
    async fn healthz_responds_ok() {
        crate::test_support::init_env();
        let service = Service::new(crate::routers::root());

        let status = TestClient::get(format!(
            "http://{}/healthz",
            config::get().listen_addr.replace("0.0.0.0", "127.0.0.1")
        ))
        .send(&service)
        .await
        .status_code;

        assert_eq!(status, Some(StatusCode::OK));
    }
}
