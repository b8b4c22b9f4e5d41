//! Inbound message dispatch (§4.3, §9). Parses the `type` tag, applies the
//! exempt-set/session-expired gate, and hands the raw payload to whichever
//! handler is registered for that tag — no reflection, no tag-specific
//! branching beyond the gate itself.

use std::time::Duration;

use crate::error::code;
use crate::registry::Role;
use crate::ws::handlers::{EXEMPT_TAGS, HandlerContext, HandlerRegistry};
use crate::ws::protocol::OutboundFrame;
use crate::ws::response::ResponseWriter;

/// Grace period between the `session_expired` frame and the close, per §4.3/§6.
const SESSION_EXPIRED_CLOSE_GRACE: Duration = Duration::from_secs(1);

pub async fn dispatch(registry: &HandlerRegistry, ctx: &HandlerContext<'_>, raw: &str) {
    let writer = ResponseWriter::new(ctx.peer);

    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            tracing::debug!(error = ?err, "malformed inbound frame, dropping");
            return;
        }
    };

    let Some(tag) = value.get("type").and_then(|t| t.as_str()) else {
        tracing::warn!("inbound frame missing 'type' field, dropping");
        return;
    };

    if !EXEMPT_TAGS.contains(&tag) {
        if ctx.peer.role() == Role::Unset {
            writer.send_error("register before sending this message", code::MISSING_FIELD);
            return;
        }
        if let Some(session_id) = ctx.peer.session_id() {
            if session_has_expired(ctx, &session_id) {
                writer.send(&OutboundFrame::SessionExpired {});
                let peer = ctx.peer.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(SESSION_EXPIRED_CLOSE_GRACE).await;
                    peer.close(
                        crate::error::STATUS_CODE_POLICY_VIOLATION,
                        "session expired".to_string(),
                    );
                });
                return;
            }
        }
    }

    let Some(handler) = registry.get(tag) else {
        tracing::warn!(tag, "unknown inbound message type, dropping");
        return;
    };

    handler.handle(ctx, value).await;
}

/// A peer's bound session has expired once the durable record says
/// `isActive=false` (§3) — ended by drain or external expiry, not merely
/// whichever classroom code happens to have timed out.
fn session_has_expired(ctx: &HandlerContext<'_>, session_id: &str) -> bool {
    let mut conn = match crate::db::get() {
        Ok(conn) => conn,
        Err(err) => {
            tracing::error!(error = ?err, "db unavailable while checking session expiry");
            return false;
        }
    };
    match ctx.state.repository.find_session(&mut conn, session_id) {
        Ok(Some(session)) => !session.is_active,
        Ok(None) => false,
        Err(err) => {
            tracing::warn!(error = ?err, session_id, "failed to look up session for expiry check");
            false
        }
    }
}
