//! `GET /healthz` (§6): plain liveness probe, no auth, no body to speak of.

use salvo::prelude::*;

#[handler]
pub async fn healthz(res: &mut Response) {
    res.render(Text::Plain("ok"));
}
