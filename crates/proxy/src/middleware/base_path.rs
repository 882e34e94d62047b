//! Strip a configured base path from the request before any other
//! middleware sees it (spec §4.8) — the only stage that must run outermost.

use crate::app::AppState;
use axum::extract::{Request, State};
use axum::http::uri::{PathAndQuery, Uri};
use axum::middleware::Next;
use axum::response::Response;

pub async fn strip_base_path(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if state.settings.base_path.is_empty() {
        return next.run(req).await;
    }

    let path = req.uri().path();
    if let Some(stripped) = path.strip_prefix(state.settings.base_path.as_str()) {
        let stripped = if stripped.is_empty() { "/" } else { stripped };
        let query = req.uri().query().map(str::to_string);
        let new_pq = match query {
            Some(q) => format!("{stripped}?{q}"),
            None => stripped.to_string(),
        };
        if let Ok(pq) = PathAndQuery::try_from(new_pq) {
            let mut parts = req.uri().clone().into_parts();
            parts.path_and_query = Some(pq);
            if let Ok(new_uri) = Uri::from_parts(parts) {
                *req.uri_mut() = new_uri;
            }
        }
    }

    next.run(req).await
}
