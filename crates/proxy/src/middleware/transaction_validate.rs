//! Validate transactional writes against the caller's CQL2 filter
//! (spec §4.5). Grounded on the original's `Cql2ValidateTransactionMiddleware`,
//! including its `_deep_merge` for PATCH semantics.
//!
//! Runs only when a filter is attached; an unrestricted caller (no filter)
//! skips validation entirely, matching the filter builder's "`None` means no
//! restriction" contract (spec §3).

use crate::app::AppState;
use crate::context::RequestContext;
use crate::errors::ProxyError;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use stac_auth_proxy_cql2::Expr;
use std::sync::LazyLock;

static TRANSACTION_PATH: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^/collections(/[^/]+)?(/items(/[^/]+)?)?/?$").expect("static pattern")
});

pub async fn validate_transaction(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    if !matches!(method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE) {
        return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    if !TRANSACTION_PATH.is_match(&path) {
        return next.run(req).await;
    }

    let Some(filter) = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|c| c.cql2_filter.clone())
    else {
        return next.run(req).await;
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (parts, body) = req.into_parts();
    let has_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);
    let body_bytes = if has_body {
        match to_bytes(body, 64 * 1024 * 1024).await {
            Ok(b) => b,
            Err(_) => {
                return ProxyError::UpstreamUnavailable("failed to read request body".into())
                    .into_response();
            }
        }
    } else {
        Default::default()
    };

    let verdict = match method {
        Method::POST => validate_create(&body_bytes, &filter),
        Method::PUT => validate_replace(&state, &path, auth_header.as_deref(), &body_bytes, &filter).await,
        Method::PATCH => validate_patch(&state, &path, auth_header.as_deref(), &body_bytes, &filter).await,
        Method::DELETE => validate_delete(&state, &path, auth_header.as_deref(), &filter).await,
        _ => unreachable!("filtered above"),
    };

    if let Err(err) = verdict {
        return err.into_response();
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    next.run(req).await
}

fn validate_create(body_bytes: &[u8], filter: &Expr) -> Result<(), ProxyError> {
    let doc: Value = serde_json::from_slice(body_bytes).map_err(|_| ProxyError::Forbidden("Invalid request body"))?;
    if filter.matches(&doc) {
        Ok(())
    } else {
        Err(ProxyError::Forbidden("Resource violates the caller's restriction"))
    }
}

async fn validate_replace(
    state: &AppState,
    path: &str,
    auth_header: Option<&str>,
    body_bytes: &[u8],
    filter: &Expr,
) -> Result<(), ProxyError> {
    fetch_current_and_check(state, path, auth_header, filter).await?;
    let doc: Value = serde_json::from_slice(body_bytes).map_err(|_| ProxyError::Forbidden("Invalid request body"))?;
    if filter.matches(&doc) {
        Ok(())
    } else {
        Err(ProxyError::Forbidden("Resource violates the caller's restriction"))
    }
}

async fn validate_patch(
    state: &AppState,
    path: &str,
    auth_header: Option<&str>,
    body_bytes: &[u8],
    filter: &Expr,
) -> Result<(), ProxyError> {
    let current = fetch_current_and_check(state, path, auth_header, filter).await?;
    let patch: Value = serde_json::from_slice(body_bytes).map_err(|_| ProxyError::Forbidden("Invalid request body"))?;
    let merged = deep_merge(current, patch);
    if filter.matches(&merged) {
        Ok(())
    } else {
        Err(ProxyError::Forbidden("Resource violates the caller's restriction"))
    }
}

async fn validate_delete(
    state: &AppState,
    path: &str,
    auth_header: Option<&str>,
    filter: &Expr,
) -> Result<(), ProxyError> {
    fetch_current_and_check(state, path, auth_header, filter).await?;
    Ok(())
}

async fn fetch_current_and_check(
    state: &AppState,
    path: &str,
    auth_header: Option<&str>,
    filter: &Expr,
) -> Result<Value, ProxyError> {
    let url = format!("{}{}", state.settings.upstream_url.trim_end_matches('/'), path);
    let mut req = state.http.get(&url);
    if let Some(auth) = auth_header {
        req = req.header(header::AUTHORIZATION, auth);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))?;
    if resp.status() == axum::http::StatusCode::NOT_FOUND {
        return Err(ProxyError::NotFound);
    }
    if !resp.status().is_success() {
        return Err(ProxyError::UpstreamUnavailable(format!(
            "unexpected upstream status {}",
            resp.status()
        )));
    }
    let current: Value = resp
        .json()
        .await
        .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))?;
    if filter.matches(&current) {
        Ok(current)
    } else {
        Err(ProxyError::NotFound)
    }
}

/// Recursively merge `patch` over `base`; any non-object value in `patch`
/// overrides the corresponding `base` value outright.
fn deep_merge(mut base: Value, patch: Value) -> Value {
    match (base.as_object_mut(), patch) {
        (Some(base_obj), Value::Object(patch_obj)) => {
            for (key, patch_val) in patch_obj {
                let merged = match base_obj.remove(&key) {
                    Some(base_val) => deep_merge(base_val, patch_val),
                    None => patch_val,
                };
                base_obj.insert(key, merged);
            }
            base
        }
        (_, patch) => patch,
    }
}
