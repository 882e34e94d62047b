//! Shared fixtures for the end-to-end pipeline tests: a minimal in-process
//! STAC API standing in for the real upstream, plus a `Settings` builder
//! that fills in every field with an inert default so each test only has
//! to override what it cares about.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Value, json};
use stac_auth_proxy::app::AppState;
use stac_auth_proxy::config::{CorsConfig, Settings};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Store(Arc<Mutex<HashMap<String, Value>>>);

/// A running mock STAC API. Seed items via `seed_item` before starting the
/// proxy under test if a scenario needs a PUT/PATCH/DELETE fetch to resolve.
pub struct MockUpstream {
    pub base_url: String,
    store: Store,
}

impl MockUpstream {
    pub async fn start() -> anyhow::Result<Self> {
        let store = Store::default();

        let router = axum::Router::new()
            .route("/collections", get(list_collections))
            .route("/api", get(openapi_doc))
            .route("/collections/{cid}/items", post(create_item))
            .route(
                "/collections/{cid}/items/{iid}",
                get(get_item).put(replace_item).patch(patch_item).delete(delete_item),
            )
            .route("/search", get(echo_query).post(echo_search_body))
            .fallback(echo_request)
            .with_state(store.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { base_url: format!("http://{addr}"), store })
    }

    pub fn seed_item(&self, collection: &str, id: &str, doc: Value) {
        let key = format!("/collections/{collection}/items/{id}");
        self.store.0.lock().unwrap().insert(key, doc);
    }
}

async fn list_collections() -> Json<Value> {
    Json(json!({
        "collections": [
            {"id": "landsat", "links": [{"rel": "items", "href": "/collections/landsat/items"}]}
        ],
        "links": [{"rel": "self", "href": "/collections"}]
    }))
}

async fn openapi_doc() -> Json<Value> {
    Json(json!({
        "openapi": "3.1.0",
        "paths": {
            "/collections": {
                "get": {"operationId": "getCollections"},
                "post": {"operationId": "createCollection"}
            }
        }
    }))
}

async fn echo_query(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    Json(json!({ "query": params }))
}

async fn echo_search_body(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn create_item(Path(cid): Path<String>, Json(mut body): Json<Value>) -> impl IntoResponse {
    if let Some(obj) = body.as_object_mut() {
        obj.entry("collection").or_insert_with(|| Value::String(cid));
    }
    (StatusCode::CREATED, Json(body))
}

async fn get_item(
    State(store): State<Store>,
    Path((cid, iid)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("/collections/{cid}/items/{iid}");
    match store.0.lock().unwrap().get(&key).cloned() {
        Some(doc) => (StatusCode::OK, Json(doc)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn replace_item(
    State(store): State<Store>,
    Path((cid, iid)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let key = format!("/collections/{cid}/items/{iid}");
    store.0.lock().unwrap().insert(key, body.clone());
    Json(body)
}

async fn patch_item(
    State(store): State<Store>,
    Path((cid, iid)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> impl IntoResponse {
    let key = format!("/collections/{cid}/items/{iid}");
    let mut store = store.0.lock().unwrap();
    let current = store.get(&key).cloned().unwrap_or_else(|| json!({}));
    let merged = merge(current, patch);
    store.insert(key, merged.clone());
    Json(merged)
}

fn merge(mut base: Value, patch: Value) -> Value {
    match (base.as_object_mut(), patch) {
        (Some(base_obj), Value::Object(patch_obj)) => {
            for (key, val) in patch_obj {
                let merged = match base_obj.remove(&key) {
                    Some(existing) => merge(existing, val),
                    None => val,
                };
                base_obj.insert(key, merged);
            }
            base
        }
        (_, patch) => patch,
    }
}

async fn delete_item(
    State(store): State<Store>,
    Path((cid, iid)): Path<(String, String)>,
) -> impl IntoResponse {
    let key = format!("/collections/{cid}/items/{iid}");
    store.0.lock().unwrap().remove(&key);
    StatusCode::NO_CONTENT
}

async fn echo_request(
    method: axum::http::Method,
    uri: axum::http::Uri,
    body: axum::body::Bytes,
) -> Json<Value> {
    let body: Option<Value> = if body.is_empty() { None } else { serde_json::from_slice(&body).ok() };
    Json(json!({
        "method": method.to_string(),
        "path": uri.path(),
        "query": uri.query(),
        "body": body,
        "links": [],
    }))
}

/// A `Settings` with every field set to an inert default; override the
/// fields a given test cares about with struct-update syntax.
pub fn base_settings(upstream_url: &str, oidc_discovery_url: &str) -> Settings {
    Settings {
        upstream_url: upstream_url.to_string(),
        oidc_discovery_url: oidc_discovery_url.to_string(),
        oidc_discovery_internal_url: None,
        allowed_jwt_audiences: vec![],
        default_public: true,
        private_endpoints: HashMap::new(),
        public_endpoints: HashMap::new(),
        items_filter: None,
        collections_filter: None,
        openapi_spec_endpoint: None,
        healthz_prefix: "/healthz".to_string(),
        base_path: String::new(),
        root_path: String::new(),
        wait_for_upstream: false,
        check_conformance: false,
        cors: CorsConfig::default(),
        proxy_name: "stac-auth-proxy".to_string(),
        upstream_timeout_secs: 15,
        oidc_timeout_secs: 5,
        emit_legacy_forwarded_headers: true,
        bind_addr: "127.0.0.1:0".to_string(),
    }
}

/// Build the app state and bind the proxy under test to an ephemeral port,
/// returning the base URL clients should hit.
pub async fn start_proxy(settings: Settings) -> anyhow::Result<String> {
    let state = AppState::build(settings).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let router = stac_auth_proxy::app::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}
