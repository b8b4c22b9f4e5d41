//! Minimal HTTP surface (§1, §6): the WebSocket upgrade plus two read-only
//! operational endpoints. Everything else the teacher's `routers.rs` wires
//! up for its own product (auth, users, friends, game, static hosting,
//! OpenAPI UI) is out of scope for this relay.

use salvo::prelude::*;

use crate::utils::limiter::{RateLimit, RouterRateLimitExt};

pub mod diagnostics;
pub mod health;

pub fn root() -> Router {
    let ws_route = Router::with_path("ws")
        .ip_rate_limit(&RateLimit::per_minute(120))
        .get(crate::ws::connection::upgrade);

    Router::new()
        .hoop(crate::utils::logger::Logger)
        .push(ws_route)
        .push(Router::with_path("healthz").get(health::healthz))
        .push(Router::with_path("diagnostics/active").get(diagnostics::active))
}
