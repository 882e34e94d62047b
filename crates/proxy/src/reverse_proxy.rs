//! Forward the (possibly mutated) request to the upstream STAC API and copy
//! its response back (spec §4.7). Grounded on the original's
//! `ReverseProxyHandler`.

use crate::app::AppState;
use crate::errors::ProxyError;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::time::{Duration, Instant};

/// Headers that are connection-scoped and must never be forwarded
/// (RFC 9110 §7.6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub async fn handle(State(state): State<AppState>, req: Request) -> Response {
    let method = req.method().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let client_host = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    let incoming_headers = req.headers().clone();
    let scheme = incoming_headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();
    let orig_host = incoming_headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (_parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, 256 * 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => {
            return ProxyError::UpstreamUnavailable("failed to read request body".into())
                .into_response();
        }
    };

    let upstream_url = format!("{}{path_and_query}", state.settings.upstream_url.trim_end_matches('/'));
    let mut outgoing = HeaderMap::new();
    for (name, value) in incoming_headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            outgoing.insert(name.clone(), value.clone());
        }
    }

    if state.settings.emit_legacy_forwarded_headers {
        outgoing
            .entry(HeaderName::from_static("x-forwarded-for"))
            .or_insert_with(|| HeaderValue::from_str(&client_host).unwrap_or_else(|_| HeaderValue::from_static("unknown")));
        outgoing
            .entry(HeaderName::from_static("x-forwarded-host"))
            .or_insert_with(|| HeaderValue::from_str(&orig_host).unwrap_or_else(|_| HeaderValue::from_static("")));
        outgoing
            .entry(HeaderName::from_static("x-forwarded-proto"))
            .or_insert_with(|| HeaderValue::from_str(&scheme).unwrap_or_else(|_| HeaderValue::from_static("http")));
    }
    outgoing.entry(header::FORWARDED).or_insert_with(|| {
        let value = format!("for={client_host};host={orig_host};proto={scheme}");
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static(""))
    });
    outgoing.entry(header::VIA).or_insert_with(|| {
        HeaderValue::from_str(&format!("1.1 {}", state.settings.proxy_name))
            .unwrap_or_else(|_| HeaderValue::from_static("1.1 stac-auth-proxy"))
    });

    if let Ok(upstream_host) = HeaderValue::from_str(
        url::Url::parse(&state.settings.upstream_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
            .as_str(),
    ) {
        outgoing.insert(header::HOST, upstream_host);
    }

    let start = Instant::now();
    let request_builder = state
        .http
        .request(method, &upstream_url)
        .headers(outgoing)
        .timeout(Duration::from_secs(state.settings.upstream_timeout_secs))
        .body(body_bytes);

    let upstream_resp = match request_builder.send().await {
        Ok(resp) => resp,
        Err(e) => return ProxyError::UpstreamUnavailable(e.to_string()).into_response(),
    };
    let elapsed = start.elapsed();

    let status = upstream_resp.status();
    let mut response_headers = upstream_resp.headers().clone();
    let body_bytes = match upstream_resp.bytes().await {
        Ok(b) => b,
        Err(e) => return ProxyError::UpstreamUnavailable(e.to_string()).into_response(),
    };

    response_headers.remove(header::CONNECTION);
    response_headers.remove(header::TRANSFER_ENCODING);
    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}", elapsed.as_secs_f64())) {
        response_headers.insert(HeaderName::from_static("x-upstream-time"), value);
    }

    let mut builder = Response::builder().status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY));
    if let Some(headers) = builder.headers_mut() {
        *headers = response_headers;
    }
    builder.body(Body::from(body_bytes)).unwrap_or_else(|_| {
        ProxyError::UpstreamUnavailable("failed to build response".into()).into_response()
    })
}
