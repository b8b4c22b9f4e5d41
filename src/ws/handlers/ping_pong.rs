//! `ping`/`pong` handlers (§4.10 liveness). Both mark the peer alive for the
//! [`crate::ws::health::HealthMonitor`] sweep; `ping` additionally echoes a
//! `pong` back immediately so a client-driven heartbeat gets a reply without
//! waiting on the server's own sweep interval.

use async_trait::async_trait;
use serde_json::Value;

use crate::ws::handlers::{HandlerContext, MessageHandler};
use crate::ws::protocol::{OutboundFrame, PingFrame};
use crate::ws::response::ResponseWriter;

pub struct PingHandler;

#[async_trait]
impl MessageHandler for PingHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: Value) {
        ctx.peer.mark_alive();
        let original_timestamp = serde_json::from_value::<PingFrame>(payload)
            .ok()
            .and_then(|p| p.timestamp);
        ResponseWriter::new(ctx.peer).send(&OutboundFrame::Pong {
            timestamp: chrono::Utc::now().timestamp_millis(),
            original_timestamp,
        });
    }
}

pub struct PongHandler;

#[async_trait]
impl MessageHandler for PongHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, _payload: Value) {
        ctx.peer.mark_alive();
    }
}
