//! Invoke the configured filter plugin and attach the resulting CQL2
//! predicate to the request context (spec §4.3). Grounded on the
//! original's `BuildCql2FilterMiddleware`.

use super::util::{extract_path_params, headers_to_map, parse_query_params};
use crate::app::AppState;
use crate::context::RequestContext;
use crate::errors::ProxyError;
use crate::filter_builder::{FilterContext, ReqInfo};
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::sync::LazyLock;

static COLLECTIONS_FILTER_PATH: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^/collections(/[^/]+)?$").expect("static pattern"));
static ITEMS_FILTER_PATH: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(/collections/([^/]+)/items(/[^/]+)?$|/search$)").expect("static pattern")
});

pub async fn build_filter(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();

    let plugin = if COLLECTIONS_FILTER_PATH.is_match(&path) {
        state.collections_filter.clone()
    } else if ITEMS_FILTER_PATH.is_match(&path) {
        state.items_filter.clone()
    } else {
        None
    };

    let Some(plugin) = plugin else {
        return next.run(req).await;
    };

    let method = req.method().clone();
    let query_params = parse_query_params(req.uri().query());
    let path_params = extract_path_params(&path);
    let headers = headers_to_map(req.headers());

    // For POST/PUT/PATCH the template may reference the body, so it must be
    // buffered here and reinserted for downstream stages (spec §4.3 timing
    // constraint).
    let body_value = if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
        let (parts, body) = req.into_parts();
        let bytes = match to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(_) => {
                return ProxyError::UpstreamUnavailable("failed to read request body".into())
                    .into_response();
            }
        };
        let value = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice::<Value>(&bytes).ok()
        };
        req = Request::from_parts(parts, Body::from(bytes));
        value
    } else {
        None
    };

    let (claims, oidc_metadata) = req
        .extensions()
        .get::<RequestContext>()
        .map(|c| (c.claims.clone(), c.oidc_metadata.clone()))
        .unwrap_or_default();

    let ctx = FilterContext {
        req: ReqInfo {
            path,
            method: method.to_string(),
            query_params,
            path_params,
            headers,
            body: body_value,
        },
        claims,
        oidc_metadata,
    };

    let expr = match plugin.build(&ctx).await {
        Ok(expr) => expr,
        Err(_) => return ProxyError::InvalidFilter.into_response(),
    };

    if let Some(expr) = &expr
        && expr.validate().is_err()
    {
        tracing::error!(filter = %expr.to_text(), "invalid cql2 filter produced by filter builder");
        return ProxyError::InvalidFilter.into_response();
    }

    match req.extensions_mut().get_mut::<RequestContext>() {
        Some(rc) => rc.cql2_filter = expr,
        None => {
            req.extensions_mut().insert(RequestContext {
                cql2_filter: expr,
                ..Default::default()
            });
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_path_matches_list_and_single_resource() {
        assert!(COLLECTIONS_FILTER_PATH.is_match("/collections"));
        assert!(COLLECTIONS_FILTER_PATH.is_match("/collections/landsat"));
        assert!(!COLLECTIONS_FILTER_PATH.is_match("/collections/landsat/items"));
    }

    #[test]
    fn items_path_matches_item_routes_and_search() {
        assert!(ITEMS_FILTER_PATH.is_match("/collections/landsat/items"));
        assert!(ITEMS_FILTER_PATH.is_match("/collections/landsat/items/scene-1"));
        assert!(ITEMS_FILTER_PATH.is_match("/search"));
        assert!(!ITEMS_FILTER_PATH.is_match("/collections/landsat"));
        assert!(!ITEMS_FILTER_PATH.is_match("/healthz"));
    }
}
