//! Startup health checks: upstream reachability with exponential backoff
//! and an optional `/conformance` probe (spec §5 "Lifecycle"). Grounded on
//! the original's `ServerHealthCheck`/`LifespanManager`.

use crate::config::Settings;
use anyhow::{Context as _, bail};
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const MAX_RETRIES: u32 = 5;

/// Conformance classes the proxy's own middleware depends on when the
/// corresponding feature is configured. Checked against the upstream's
/// advertised `conformsTo` list by regex (spec §5).
fn required_conformance_classes(settings: &Settings) -> Vec<&'static str> {
    let mut required = vec![r"https://api\.stacspec\.org/v1\.\d+\.\d+/core"];
    if settings.items_filter.is_some() || settings.collections_filter.is_some() {
        required.push(r"https://api\.stacspec\.org/v1\.\d+\.\d+/item-search#filter");
    }
    required
}

pub async fn run_startup_checks(http: &reqwest::Client, settings: &Settings) -> anyhow::Result<()> {
    if settings.wait_for_upstream {
        wait_for_upstream(http, &settings.upstream_url).await?;
    }
    if settings.check_conformance {
        check_conformance(http, settings).await?;
    }
    Ok(())
}

async fn wait_for_upstream(http: &reqwest::Client, upstream_url: &str) -> anyhow::Result<()> {
    let mut delay = INITIAL_BACKOFF;
    for attempt in 0..MAX_RETRIES {
        match http.get(upstream_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(url = upstream_url, "upstream is healthy");
                return Ok(());
            }
            Ok(resp) => {
                tracing::warn!(url = upstream_url, status = %resp.status(), attempt, "upstream not healthy yet");
            }
            Err(e) => {
                tracing::warn!(url = upstream_url, error = %e, attempt, "upstream health check failed");
            }
        }
        if attempt + 1 < MAX_RETRIES {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(MAX_BACKOFF);
        }
    }
    bail!("upstream API {upstream_url:?} failed to respond after {MAX_RETRIES} attempts");
}

async fn check_conformance(http: &reqwest::Client, settings: &Settings) -> anyhow::Result<()> {
    let url = format!("{}/conformance", settings.upstream_url.trim_end_matches('/'));
    let body: serde_json::Value = http
        .get(&url)
        .send()
        .await
        .context("fetch /conformance")?
        .error_for_status()
        .context("upstream /conformance returned an error status")?
        .json()
        .await
        .context("parse /conformance body")?;

    let advertised: Vec<String> = body
        .get("conformsTo")
        .and_then(serde_json::Value::as_array)
        .map(|list| list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    for required in required_conformance_classes(settings) {
        let pattern = regex::Regex::new(required).context("compile conformance pattern")?;
        if !advertised.iter().any(|class| pattern.is_match(class)) {
            bail!("upstream does not advertise required conformance class matching {required:?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(items_filter: bool) -> Settings {
        Settings {
            upstream_url: "http://upstream".into(),
            oidc_discovery_url: "http://idp/.well-known/openid-configuration".into(),
            oidc_discovery_internal_url: None,
            allowed_jwt_audiences: vec![],
            default_public: true,
            private_endpoints: HashMap::new(),
            public_endpoints: HashMap::new(),
            items_filter: items_filter.then(|| crate::config::FilterConfig::Template {
                template: "true".into(),
            }),
            collections_filter: None,
            openapi_spec_endpoint: None,
            healthz_prefix: "/healthz".into(),
            base_path: String::new(),
            root_path: String::new(),
            wait_for_upstream: false,
            check_conformance: false,
            cors: crate::config::CorsConfig::default(),
            proxy_name: "stac-auth-proxy".into(),
            upstream_timeout_secs: 15,
            oidc_timeout_secs: 5,
            emit_legacy_forwarded_headers: true,
            bind_addr: "0.0.0.0:8000".into(),
        }
    }

    #[test]
    fn filter_usage_adds_search_conformance_requirement() {
        assert_eq!(required_conformance_classes(&settings(false)).len(), 1);
        assert_eq!(required_conformance_classes(&settings(true)).len(), 2);
    }
}
