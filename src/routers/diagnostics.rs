//! `GET /diagnostics/active` (§4.13, §6): the (out-of-scope) diagnostics
//! aggregator's one HTTP entry point. Deliberately reports "live peers" and
//! "durable active sessions" as two distinct fields rather than merging
//! them, per the REDESIGN FLAGS decision in §9/DESIGN.md.

use salvo::prelude::*;
use serde::Serialize;

use crate::error::AppResult;
use crate::registry::ActiveStateProvider;

#[derive(Debug, Serialize)]
struct LivePeers {
    active_sessions: usize,
    students: usize,
    teachers: usize,
    languages_in_use: Vec<String>,
}

#[derive(Debug, Serialize)]
struct DiagnosticsPayload {
    live: LivePeers,
    durable_active_sessions: i64,
}

#[handler]
pub async fn active(res: &mut Response) -> AppResult<()> {
    let state = crate::ws::get();
    let snapshot = state.registry.active_snapshot();
    let mut conn = crate::db::get()?;
    let durable_active_sessions = state.repository.count_active(&mut conn)?;

    res.render(Json(DiagnosticsPayload {
        live: LivePeers {
            active_sessions: snapshot.active_sessions,
            students: snapshot.students,
            teachers: snapshot.teachers,
            languages_in_use: snapshot.languages_in_use,
        },
        durable_active_sessions,
    }));
    Ok(())
}
