//! Publish OIDC security metadata on STAC catalog/collection/item/search
//! responses via the STAC Authentication Extension (spec §4.6
//! "Authentication Extension mutator"). Grounded on the original's
//! `AuthenticationExtensionMiddleware`, whose `transform_json` was a stub;
//! the concrete `auth:schemes`/`auth:refs` shape follows spec §4.6's fuller
//! prose.

use super::json_mutator::mutate_json_response;
use super::util::collect_links_mut;
use crate::app::AppState;
use crate::context::RequestContext;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{Value, json};
use std::sync::LazyLock;

const AUTH_EXTENSION_URL: &str = "https://stac-extensions.github.io/authentication/v1.1.0/schema.json";
const SCHEME_NAME: &str = "oidcAuth";

static AUGMENTED_PATH: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(/|/collections(/[^/]+(/items(/[^/]+)?)?)?|/search)$").expect("static pattern")
});

pub async fn add_auth_extension(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let path_matches = AUGMENTED_PATH.is_match(&path);

    let oidc_metadata = req
        .extensions()
        .get::<RequestContext>()
        .and_then(|c| c.oidc_metadata.clone());

    let resp = next.run(req).await;
    let is_json = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.starts_with("application/geo+json"));

    let Some(metadata) = oidc_metadata else {
        return resp;
    };

    mutate_json_response(resp, path_matches && is_json, move |value| {
        let mut value = value;
        let Value::Object(obj) = &mut value else {
            return None;
        };

        let extensions = obj
            .entry("stac_extensions")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = extensions
            && !list.iter().any(|v| v.as_str() == Some(AUTH_EXTENSION_URL))
        {
            list.push(Value::String(AUTH_EXTENSION_URL.to_string()));
        }

        obj.insert(
            "auth:schemes".to_string(),
            json!({
                SCHEME_NAME: {
                    "type": "openIdConnect",
                    "openIdConnectUrl": metadata.authorization_endpoint,
                    "tokenEndpoint": metadata.token_endpoint,
                    "scopes": metadata.scopes_supported,
                }
            }),
        );

        for link in collect_links_mut(&mut value) {
            let Some(link_path) = link
                .get("href")
                .and_then(Value::as_str)
                .and_then(|href| url::Url::parse(href).ok().map(|u| u.path().to_string()))
            else {
                continue;
            };
            let result = state.classifier.classify(&link_path, "GET");
            if result.is_private && let Value::Object(link_obj) = link {
                let refs = link_obj
                    .entry("auth:refs")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Value::Array(list) = refs
                    && !list.iter().any(|v| v.as_str() == Some(SCHEME_NAME))
                {
                    list.push(Value::String(SCHEME_NAME.to_string()));
                }
            }
        }

        Some(value)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_expected_stac_endpoints() {
        assert!(AUGMENTED_PATH.is_match("/"));
        assert!(AUGMENTED_PATH.is_match("/collections"));
        assert!(AUGMENTED_PATH.is_match("/collections/foo"));
        assert!(AUGMENTED_PATH.is_match("/collections/foo/items"));
        assert!(AUGMENTED_PATH.is_match("/collections/foo/items/bar"));
        assert!(AUGMENTED_PATH.is_match("/search"));
        assert!(!AUGMENTED_PATH.is_match("/healthz"));
    }
}
