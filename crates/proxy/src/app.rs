//! Application state and the middleware chain that wires the pipeline
//! stages together.
//!
//! `Router::layer` wraps outside-in: the last `.layer()` call added is the
//! first to see the incoming request and the last to see the outgoing
//! response. Reading the stack below bottom-up gives the request order:
//! strip base path, enforce auth, rewrite links, add the Authentication
//! Extension, rewrite the OpenAPI document, build the scope filter,
//! validate transactional writes against it, then apply it to the
//! forwarded request. On the way back out each stage gets a chance to
//! mutate the upstream response in the reverse order.
//!
//! The filter stages have a data dependency that pins their relative order:
//! `filter_build` reads the caller's claims (written by `auth_enforce`) and
//! writes the compiled `Expr` into the request's `RequestContext`;
//! `transaction_validate` and `filter_apply` both read that `Expr` back out,
//! so both must sit inside `filter_build` in the stack.

use crate::classifier::EndpointClassifier;
use crate::config::Settings;
use crate::errors::ConfigError;
use crate::filter_builder::FilterPlugin;
use crate::middleware::{
    auth_enforce, auth_extension, base_path, filter_apply, filter_build, link_rewrite, openapi_rewrite,
    transaction_validate,
};
use crate::oidc::{OidcConfig, OidcValidator};
use crate::reverse_proxy;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub classifier: Arc<EndpointClassifier>,
    pub oidc: OidcValidator,
    pub items_filter: Option<Arc<dyn FilterPlugin>>,
    pub collections_filter: Option<Arc<dyn FilterPlugin>>,
    pub http: reqwest::Client,
}

impl AppState {
    /// # Errors
    ///
    /// Returns `ConfigError` if an endpoint pattern or filter template
    /// fails to compile.
    pub fn build(settings: Settings) -> Result<Self, ConfigError> {
        let classifier = EndpointClassifier::new(&settings)?;

        let http = reqwest::Client::builder()
            .build()
            .expect("reqwest client construction is infallible with default tls config");

        let oidc = OidcValidator::new(
            http.clone(),
            OidcConfig {
                discovery_url: settings.oidc_discovery_url.clone(),
                discovery_internal_url: settings.oidc_discovery_internal_url.clone(),
                audiences: settings.allowed_jwt_audiences.clone(),
                leeway_secs: 0,
                jwks_refresh_secs: 300,
                timeout_secs: settings.oidc_timeout_secs,
            },
        );

        let items_filter = settings.items_filter.as_ref().map(crate::config::FilterConfig::compile).transpose()?;
        let collections_filter = settings
            .collections_filter
            .as_ref()
            .map(crate::config::FilterConfig::compile)
            .transpose()?;

        Ok(Self {
            settings: Arc::new(settings),
            classifier: Arc::new(classifier),
            oidc,
            items_filter,
            collections_filter,
            http,
        })
    }
}

#[must_use]
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors);
    let healthz_prefix = state.settings.healthz_prefix.clone();

    let proxied = Router::new()
        .route("/{*path}", any(reverse_proxy::handle))
        .route("/", any(reverse_proxy::handle))
        .layer(from_fn_with_state(state.clone(), filter_apply::apply_filter))
        .layer(from_fn_with_state(state.clone(), transaction_validate::validate_transaction))
        .layer(from_fn_with_state(state.clone(), filter_build::build_filter))
        .layer(from_fn_with_state(state.clone(), openapi_rewrite::rewrite_openapi))
        .layer(from_fn_with_state(state.clone(), auth_extension::add_auth_extension))
        .layer(from_fn_with_state(state.clone(), link_rewrite::rewrite_links))
        .layer(from_fn_with_state(state.clone(), auth_enforce::enforce))
        .layer(from_fn_with_state(state.clone(), base_path::strip_base_path))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Served directly, outside the middleware stack above, so liveness
    // checks never depend on auth config or upstream reachability.
    let health_router = Router::new().route(&healthz_prefix, get(healthz));

    health_router.merge(proxied)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Builds the CORS layer from `cors` (spec §6). An empty `allow_origins`
/// list disables CORS entirely, matching the default off-by-default
/// behavior of the original's `CORSMiddleware` wiring.
fn cors_layer(cors: &crate::config::CorsConfig) -> CorsLayer {
    if cors.allow_origins.is_empty() {
        return CorsLayer::new();
    }

    let mut layer = CorsLayer::new();

    layer = if cors.allow_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors.allow_origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    };

    layer = if cors.allow_methods.is_empty() {
        layer.allow_methods(Any)
    } else {
        let methods: Vec<Method> = cors.allow_methods.iter().filter_map(|m| m.parse().ok()).collect();
        layer.allow_methods(methods)
    };

    layer = if cors.allow_headers.is_empty() {
        layer.allow_headers(Any)
    } else {
        let headers: Vec<HeaderName> = cors.allow_headers.iter().filter_map(|h| h.parse().ok()).collect();
        layer.allow_headers(headers)
    };

    layer = layer.allow_credentials(cors.allow_credentials);

    if !cors.expose_headers.is_empty() {
        let headers: Vec<HeaderName> = cors.expose_headers.iter().filter_map(|h| h.parse().ok()).collect();
        layer = layer.expose_headers(headers);
    }

    if let Some(secs) = cors.max_age_secs {
        layer = layer.max_age(Duration::from_secs(secs));
    }

    layer
}
