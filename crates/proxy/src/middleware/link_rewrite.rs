//! Rewrite upstream-hosted hyperlinks to the client-visible host (spec
//! §4.6 "Link processor"). Grounded on the original's `ProcessLinksMiddleware`.

use super::json_mutator::mutate_json_response;
use super::util::collect_links_mut;
use crate::app::AppState;
use crate::context::RequestContext;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use url::Url;

pub async fn rewrite_links(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let base_url = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|c| c.base_url.clone());
    let upstream_url = state.settings.upstream_url.clone();
    let root_path = state.settings.root_path.clone();

    let resp = next.run(req).await;
    let is_json = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_json_content_type);

    let Some(base_url) = base_url else {
        return resp;
    };

    mutate_json_response(resp, is_json, move |value| {
        let Ok(req_base) = Url::parse(&base_url) else {
            return None;
        };
        let Ok(upstream_base) = Url::parse(&upstream_url) else {
            return None;
        };
        let mut value = value;
        for link in collect_links_mut(&mut value) {
            rewrite_link(link, &req_base, &upstream_base, Some(root_path.as_str()));
        }
        Some(value)
    })
    .await
}

fn is_json_content_type(ct: &str) -> bool {
    let ct = ct.split(';').next().unwrap_or(ct).trim();
    matches!(ct, "application/json" | "application/geo+json") || ct.starts_with("application/vnd.oai.openapi+json")
}

fn rewrite_link(link: &mut Value, req_base: &Url, upstream_base: &Url, root_path: Option<&str>) {
    let Some(href) = link.get("href").and_then(Value::as_str) else {
        return;
    };
    let Ok(mut parsed) = Url::parse(href) else {
        return;
    };

    let netloc = parsed.host_str().map(|h| netloc_with_port(h, parsed.port(), parsed.scheme()));
    let req_netloc = req_base
        .host_str()
        .map(|h| netloc_with_port(h, req_base.port(), req_base.scheme()));
    let upstream_netloc = upstream_base
        .host_str()
        .map(|h| netloc_with_port(h, upstream_base.port(), upstream_base.scheme()));

    if netloc != req_netloc && netloc != upstream_netloc {
        return;
    }

    let upstream_path = upstream_base.path();
    if upstream_path != "/" && !parsed.path().starts_with(upstream_path) {
        return;
    }

    if netloc == upstream_netloc {
        let _ = parsed.set_scheme(req_base.scheme());
        let _ = parsed.set_host(req_base.host_str());
        let _ = parsed.set_port(req_base.port());
    }

    if upstream_path != "/" && parsed.path().starts_with(upstream_path) {
        let remainder = parsed.path()[upstream_path.len()..].to_string();
        parsed.set_path(&remainder);
    }

    if let Some(root) = root_path
        && !root.is_empty()
    {
        let new_path = format!("{root}{}", parsed.path());
        parsed.set_path(&new_path);
    }

    *link.get_mut("href").unwrap() = Value::String(parsed.to_string());
}

fn netloc_with_port(host: &str, port: Option<u16>, scheme: &str) -> String {
    match port {
        Some(p) if !is_standard_port(scheme, p) => format!("{host}:{p}"),
        _ => host.to_string(),
    }
}

fn is_standard_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrites_upstream_host_to_client_host() {
        let req_base = Url::parse("https://proxy.example.com").unwrap();
        let upstream_base = Url::parse("http://upstream.internal:8080/stac").unwrap();
        let mut link = json!({"rel": "self", "href": "http://upstream.internal:8080/stac/collections"});
        rewrite_link(&mut link, &req_base, &upstream_base, None);
        assert_eq!(link["href"], "https://proxy.example.com/collections");
    }

    #[test]
    fn leaves_unrelated_hosts_untouched() {
        let req_base = Url::parse("https://proxy.example.com").unwrap();
        let upstream_base = Url::parse("http://upstream.internal/stac").unwrap();
        let mut link = json!({"rel": "license", "href": "https://spdx.org/licenses/CC-BY-4.0"});
        rewrite_link(&mut link, &req_base, &upstream_base, None);
        assert_eq!(link["href"], "https://spdx.org/licenses/CC-BY-4.0");
    }

    #[test]
    fn prepends_root_path_when_configured() {
        let req_base = Url::parse("https://proxy.example.com").unwrap();
        let upstream_base = Url::parse("http://upstream.internal/").unwrap();
        let mut link = json!({"rel": "self", "href": "http://upstream.internal/collections"});
        rewrite_link(&mut link, &req_base, &upstream_base, Some("/api"));
        assert_eq!(link["href"], "https://proxy.example.com/api/collections");
    }
}
