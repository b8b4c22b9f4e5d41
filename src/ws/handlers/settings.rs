//! `settings` handler (§4.8): a shallow-merge patch onto the peer's own
//! settings, acknowledged with the merged result.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::code;
use crate::ws::handlers::{HandlerContext, MessageHandler};
use crate::ws::protocol::{OutboundFrame, SettingsRequest};
use crate::ws::response::ResponseWriter;

pub struct SettingsHandler;

#[async_trait]
impl MessageHandler for SettingsHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, payload: Value) {
        let writer = ResponseWriter::new(ctx.peer);

        let req: SettingsRequest = match serde_json::from_value(payload) {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(error = ?err, "malformed settings payload");
                writer.send_error("malformed settings message", code::MISSING_FIELD);
                return;
            }
        };

        if let Some(patch) = &req.settings {
            ctx.peer.merge_settings(patch);
        }
        if let Some(tts_service_type) = req.tts_service_type {
            ctx.peer.merge_settings(&crate::registry::PeerSettings {
                tts_service_type: Some(tts_service_type),
                extra: Default::default(),
            });
        }

        writer.send(&OutboundFrame::Settings {
            status: "success",
            settings: ctx.peer.settings(),
        });
    }
}
