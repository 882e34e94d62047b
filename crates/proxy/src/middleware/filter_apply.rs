//! Inject the per-caller CQL2 predicate into the outgoing query or body
//! (spec §4.4). Grounded on the original's `ApplyCql2FilterMiddleware`.
//!
//! List endpoints get the filter combined into the querystring or JSON body
//! ahead of the reverse proxy hop; single-resource endpoints are instead
//! checked against the upstream response body after the fact, with
//! non-matches rewritten to 404 (a filtered-out resource must look the same
//! as an absent one, spec §7).

use crate::app::AppState;
use crate::context::RequestContext;
use crate::errors::ProxyError;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::Method;
use axum::http::uri::{PathAndQuery, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use stac_auth_proxy_cql2::{Expr, parse_json, parse_text};
use std::sync::LazyLock;

static SINGLE_RESOURCE_PATH: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^/collections/[^/]+/items/[^/]+/?$").expect("static pattern")
});

/// The only STAC route where a POST body is a search request rather than a
/// resource to create — `POST /collections/{id}/items` is a transactional
/// write and must never have a `filter` key spliced into the submitted Item.
static SEARCH_BODY_PATH: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^/search/?$").expect("static pattern"));

pub async fn apply_filter(State(_state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(filter) = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|c| c.cql2_filter.clone())
    else {
        return next.run(req).await;
    };

    let path = req.uri().path().to_string();
    let is_single_resource = req.method() == Method::GET && SINGLE_RESOURCE_PATH.is_match(&path);

    let req = match inject_filter(req, &filter, &path).await {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let resp = next.run(req).await;

    if is_single_resource {
        return rewrite_to_404_if_filtered_out(resp, &filter).await;
    }

    resp
}

async fn inject_filter(req: Request, filter: &Expr, path: &str) -> Result<Request, Response> {
    match *req.method() {
        Method::GET => Ok(inject_into_query(req, filter)),
        // Only `POST /search`-shaped bodies carry a `filter` key to merge
        // into; PUT/PATCH on a resource, and POST to a transactional
        // collection, are handled by the transaction validator via direct
        // `matches()` checks, not by rewriting the submitted document.
        Method::POST if SEARCH_BODY_PATH.is_match(path) => inject_into_body(req, filter).await,
        _ => Ok(req),
    }
}

fn inject_into_query(mut req: Request, filter: &Expr) -> Request {
    let query = req.uri().query().unwrap_or_default();
    let mut params: Vec<(String, String)> =
        url::form_urlencoded::parse(query.as_bytes()).into_owned().collect();

    let filter_lang = params
        .iter()
        .find(|(k, _)| k == "filter-lang")
        .map(|(_, v)| v.clone())
        .unwrap_or_else(|| "cql2-text".to_string());

    let existing = params.iter().position(|(k, _)| k == "filter");
    let combined = match existing.and_then(|i| params.get(i).map(|(_, v)| v.clone())) {
        Some(raw) => match parse_existing_text(&raw, &filter_lang) {
            Some(existing_expr) => existing_expr.combine_and(filter.clone()),
            None => filter.clone(),
        },
        None => filter.clone(),
    };

    let serialized = if filter_lang == "cql2-json" {
        serde_json::to_string(&combined.to_json()).unwrap_or_default()
    } else {
        combined.to_text()
    };

    if let Some(i) = existing {
        params[i].1 = serialized;
    } else {
        params.push(("filter".to_string(), serialized));
    }
    if !params.iter().any(|(k, _)| k == "filter-lang") {
        params.push(("filter-lang".to_string(), filter_lang));
    }

    let new_query: String = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&params)
        .finish();
    let path = req.uri().path();
    let new_pq = if new_query.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{new_query}")
    };
    if let Ok(pq) = PathAndQuery::try_from(new_pq) {
        let mut parts = req.uri().clone().into_parts();
        parts.path_and_query = Some(pq);
        if let Ok(new_uri) = Uri::from_parts(parts) {
            *req.uri_mut() = new_uri;
        }
    }
    req
}

fn parse_existing_text(raw: &str, filter_lang: &str) -> Option<Expr> {
    if filter_lang == "cql2-json" {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| parse_json(&v).ok())
    } else {
        parse_text(raw).ok()
    }
}

async fn inject_into_body(req: Request, filter: &Expr) -> Result<Request, Response> {
    let (mut parts, body) = req.into_parts();
    let bytes = to_bytes(body, 64 * 1024 * 1024)
        .await
        .map_err(|_| ProxyError::UpstreamUnavailable("failed to read request body".into()).into_response())?;

    let mut doc: Value = if bytes.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        serde_json::from_slice(&bytes).map_err(|_| ProxyError::InvalidFilter.into_response())?
    };
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| ProxyError::InvalidFilter.into_response())?;

    let filter_lang = obj
        .get("filter-lang")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "cql2-json".to_string());

    let combined = match obj.get("filter") {
        Some(existing) => match parse_existing_value(existing, &filter_lang) {
            Some(existing_expr) => existing_expr.combine_and(filter.clone()),
            None => filter.clone(),
        },
        None => filter.clone(),
    };

    let serialized = if filter_lang == "cql2-text" {
        Value::String(combined.to_text())
    } else {
        combined.to_json()
    };
    obj.insert("filter".to_string(), serialized);
    obj.entry("filter-lang")
        .or_insert_with(|| Value::String(filter_lang));

    let new_bytes = serde_json::to_vec(&doc).map_err(|_| ProxyError::InvalidFilter.into_response())?;
    if let Ok(value) = axum::http::HeaderValue::from_str(&new_bytes.len().to_string()) {
        parts.headers.insert(axum::http::header::CONTENT_LENGTH, value);
    }
    Ok(Request::from_parts(parts, Body::from(new_bytes)))
}

fn parse_existing_value(raw: &Value, filter_lang: &str) -> Option<Expr> {
    if filter_lang == "cql2-text" {
        raw.as_str().and_then(|s| parse_text(s).ok())
    } else {
        parse_json(raw).ok()
    }
}

async fn rewrite_to_404_if_filtered_out(resp: Response, filter: &Expr) -> Response {
    if !resp.status().is_success() {
        return resp;
    }
    let (parts, body) = resp.into_parts();
    let bytes = match to_bytes(body, 64 * 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(doc) if !filter.matches(&doc) => ProxyError::NotFound.into_response(),
        _ => Response::from_parts(parts, Body::from(bytes)),
    }
}
