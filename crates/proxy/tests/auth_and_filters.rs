//! End-to-end pipeline tests: real HTTP requests against a proxy instance
//! bound to an ephemeral port, a mock OIDC issuer, and a mock upstream STAC
//! API, exercising auth enforcement, filter injection, and transaction
//! validation together the way a deployed proxy actually sees them.

mod common;

use common::{MockUpstream, base_settings, start_proxy};
use stac_auth_proxy::config::{EndpointMethods, FilterConfig, MethodEntry};
use stac_auth_proxy_test_support::mock_oidc::MockOidc;
use std::collections::HashMap;

fn entry(method: &str, scopes: &[&str]) -> MethodEntry {
    MethodEntry {
        method: method.to_string(),
        required_scopes: scopes.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn public_endpoint_is_reachable_without_a_token() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    let base = start_proxy(settings).await.unwrap();

    let resp = reqwest::get(format!("{base}/collections")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["collections"][0]["id"], "landsat");
}

#[tokio::test]
async fn default_private_endpoint_rejects_missing_token() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.default_public = false;
    let base = start_proxy(settings).await.unwrap();

    let resp = reqwest::get(format!("{base}/collections")).await.unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn default_private_endpoint_accepts_a_valid_token() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.default_public = false;
    let base = start_proxy(settings).await.unwrap();

    let token = oidc.sign_jwt("openid", None).unwrap();
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/collections"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn missing_required_scope_is_rejected_before_reaching_upstream() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.default_public = true;
    let private: EndpointMethods =
        HashMap::from([("^/collections$".to_string(), vec![entry("POST", &["collections:create"])])]);
    settings.private_endpoints = private;
    let base = start_proxy(settings).await.unwrap();

    let token = oidc.sign_jwt("openid", None).unwrap();
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/collections"))
        .bearer_auth(&token)
        .json(&serde_json::json!({"id": "new-collection"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert!(resp.headers().get("www-authenticate").is_some());

    let token_with_scope = oidc.sign_jwt("openid collections:create", None).unwrap();
    let resp = client
        .post(format!("{base}/collections"))
        .bearer_auth(token_with_scope)
        .json(&serde_json::json!({"id": "new-collection"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn anonymous_caller_gets_the_restrictive_branch_of_a_scope_based_filter() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::ScopeBased {
        scope: "collections:read-all".to_string(),
        filter_if_present: "true".to_string(),
        filter_if_absent: "collection = 'public'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let resp = reqwest::get(format!("{base}/search")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["query"]["filter"], "collection = 'public'");
    assert_eq!(body["query"]["filter-lang"], "cql2-text");
}

#[tokio::test]
async fn authenticated_caller_with_scope_gets_the_unrestricted_branch() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::ScopeBased {
        scope: "collections:read-all".to_string(),
        filter_if_present: "true".to_string(),
        filter_if_absent: "collection = 'public'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let token = oidc.sign_jwt("openid collections:read-all", None).unwrap();
    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/search")).bearer_auth(token).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["query"]["filter"], "true");
}

#[tokio::test]
async fn transaction_validator_rejects_item_creation_outside_the_caller_filter() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/collections/landsat/items"))
        .json(&serde_json::json!({"id": "scene-1", "collection": "forbidden"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn transaction_validator_allows_item_creation_matching_the_caller_filter_and_strips_no_filter_key() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/collections/landsat/items"))
        .json(&serde_json::json!({"id": "scene-1", "collection": "allowed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    // The upstream echoed the Item straight back; no `filter` key should
    // have been spliced into the submitted document along the way.
    assert!(body.get("filter").is_none());
    assert_eq!(body["id"], "scene-1");
}

#[tokio::test]
async fn transaction_validator_blocks_patch_that_would_move_item_out_of_the_filter() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    upstream.seed_item("landsat", "scene-1", serde_json::json!({"id": "scene-1", "collection": "allowed"}));
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .patch(format!("{base}/collections/landsat/items/scene-1"))
        .json(&serde_json::json!({"collection": "forbidden"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn transaction_validator_allows_patch_that_keeps_item_inside_the_filter() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    upstream.seed_item(
        "landsat",
        "scene-1",
        serde_json::json!({"id": "scene-1", "collection": "allowed", "properties": {"cloud": 10}}),
    );
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .patch(format!("{base}/collections/landsat/items/scene-1"))
        .json(&serde_json::json!({"properties": {"cloud": 20}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["properties"]["cloud"], 20);
    assert_eq!(body["collection"], "allowed");
}

#[tokio::test]
async fn transaction_validator_returns_not_found_for_delete_of_an_out_of_filter_item() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    upstream.seed_item("landsat", "scene-1", serde_json::json!({"id": "scene-1", "collection": "forbidden"}));
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client.delete(format!("{base}/collections/landsat/items/scene-1")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn single_resource_read_outside_filter_is_rewritten_to_404() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    upstream.seed_item("landsat", "scene-1", serde_json::json!({"id": "scene-1", "collection": "forbidden"}));
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let resp = reqwest::get(format!("{base}/collections/landsat/items/scene-1")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn single_resource_read_matching_filter_passes_through() {
    let upstream = MockUpstream::start().await.unwrap();
    let oidc = MockOidc::start().await.unwrap();
    upstream.seed_item("landsat", "scene-1", serde_json::json!({"id": "scene-1", "collection": "allowed"}));
    let mut settings = base_settings(&upstream.base_url, &oidc.discovery_url());
    settings.items_filter = Some(FilterConfig::Template {
        template: "collection = 'allowed'".to_string(),
    });
    let base = start_proxy(settings).await.unwrap();

    let resp = reqwest::get(format!("{base}/collections/landsat/items/scene-1")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "scene-1");
}
