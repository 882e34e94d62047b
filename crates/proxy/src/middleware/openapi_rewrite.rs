//! Augment the upstream OpenAPI document with an OIDC security scheme and
//! mark private operations as requiring it (spec §4.6 "OpenAPI mutator").
//! Grounded on the original's `OpenApiMiddleware`/`UpdateOpenApiMiddleware`.

use super::json_mutator::mutate_json_response;
use crate::app::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{Value, json};

const SCHEME_NAME: &str = "oidcAuth";

pub async fn rewrite_openapi(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(spec_path) = state.settings.openapi_spec_endpoint.clone() else {
        return next.run(req).await;
    };
    let matches = req.uri().path() == spec_path;

    let resp = next.run(req).await;
    let is_json = resp
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json") || ct.contains("openapi+json"));

    mutate_json_response(resp, matches && is_json, move |value| {
        let Value::Object(mut spec) = value else {
            return None;
        };

        let components = spec
            .entry("components")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(components) = components {
            components.insert(
                "securitySchemes".to_string(),
                json!({
                    SCHEME_NAME: {
                        "type": "openIdConnect",
                        "openIdConnectUrl": state.settings.oidc_discovery_url,
                    }
                }),
            );
        }

        if let Some(Value::Object(paths)) = spec.get_mut("paths") {
            for (path, methods) in paths.iter_mut() {
                let Value::Object(methods) = methods else { continue };
                for (method, operation) in methods.iter_mut() {
                    let result = state.classifier.classify(path, method);
                    if !result.is_private {
                        continue;
                    }
                    let Value::Object(operation) = operation else { continue };
                    let security = operation
                        .entry("security")
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(list) = security {
                        list.push(json!({ SCHEME_NAME: [] }));
                    }
                }
            }
        }

        Some(Value::Object(spec))
    })
    .await
}

#[cfg(test)]
mod tests {
    use crate::classifier::EndpointClassifier;
    use crate::config::{CorsConfig, EndpointMethods, MethodEntry, Settings};
    use std::collections::HashMap;

    fn classifier() -> EndpointClassifier {
        let private: EndpointMethods = HashMap::from([(
            "^/collections$".to_string(),
            vec![MethodEntry {
                method: "POST".to_string(),
                required_scopes: Vec::new(),
            }],
        )]);
        let settings = Settings {
            upstream_url: "http://upstream".into(),
            oidc_discovery_url: "http://idp/.well-known/openid-configuration".into(),
            oidc_discovery_internal_url: None,
            allowed_jwt_audiences: vec![],
            default_public: true,
            private_endpoints: private,
            public_endpoints: HashMap::new(),
            items_filter: None,
            collections_filter: None,
            openapi_spec_endpoint: None,
            healthz_prefix: "/healthz".into(),
            base_path: String::new(),
            root_path: String::new(),
            wait_for_upstream: false,
            check_conformance: false,
            cors: CorsConfig::default(),
            proxy_name: "stac-auth-proxy".into(),
            upstream_timeout_secs: 15,
            oidc_timeout_secs: 5,
            emit_legacy_forwarded_headers: true,
            bind_addr: "0.0.0.0:8000".into(),
        };
        EndpointClassifier::new(&settings).unwrap()
    }

    #[test]
    fn marks_only_private_operations_as_secured() {
        let classifier = classifier();
        assert!(classifier.classify("/collections", "POST").is_private);
        assert!(!classifier.classify("/collections", "GET").is_private);
    }
}
