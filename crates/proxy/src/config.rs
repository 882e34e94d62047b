//! Environment-driven configuration (spec §6), loaded once at startup.
//!
//! Mirrors the base gateway's `OidcValidator::from_env` idiom: read
//! `std::env::var`, trim, parse, fall back to a documented default. Complex
//! values (pattern maps, filter descriptors, CORS lists) are JSON-encoded in
//! their env var, the way the original Python proxy's `pydantic-settings`
//! parses complex env vars as JSON.

use crate::errors::ConfigError;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

const ENV_PREFIX: &str = "STAC_AUTH_PROXY_";

fn env_var(name: &'static str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `"GET"` or `("GET", ["scope:create", ...])` (spec §6).
#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub method: String,
    pub required_scopes: Vec<String>,
}

impl<'de> Deserialize<'de> for MethodEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Plain(String),
            Scoped(String, Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Plain(method) => MethodEntry {
                method,
                required_scopes: Vec::new(),
            },
            Raw::Scoped(method, required_scopes) => MethodEntry {
                method,
                required_scopes,
            },
        })
    }
}

pub type EndpointMethods = HashMap<String, Vec<MethodEntry>>;

/// A filter-plugin descriptor (spec §9 closed registry, replacing the
/// original's `{cls, args, kwargs}` dynamic class loading).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FilterConfig {
    /// A minijinja expression template evaluated against `{req, claims,
    /// oidc_metadata}`; must render to CQL2-text.
    Template { template: String },
    /// Emits `filter_if_present` when `scope` is present in the token's
    /// `scope` claim, `filter_if_absent` otherwise (anonymous callers take
    /// the `filter_if_absent` branch).
    ScopeBased {
        scope: String,
        filter_if_present: String,
        filter_if_absent: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub allow_methods: Vec<String>,
    #[serde(default)]
    pub allow_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub expose_headers: Vec<String>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub upstream_url: String,
    pub oidc_discovery_url: String,
    pub oidc_discovery_internal_url: Option<String>,
    pub allowed_jwt_audiences: Vec<String>,

    pub default_public: bool,
    pub private_endpoints: EndpointMethods,
    pub public_endpoints: EndpointMethods,

    pub items_filter: Option<FilterConfig>,
    pub collections_filter: Option<FilterConfig>,

    pub openapi_spec_endpoint: Option<String>,
    pub healthz_prefix: String,
    pub base_path: String,
    pub root_path: String,

    pub wait_for_upstream: bool,
    pub check_conformance: bool,

    pub cors: CorsConfig,

    pub proxy_name: String,
    pub upstream_timeout_secs: u64,
    pub oidc_timeout_secs: u64,
    pub emit_legacy_forwarded_headers: bool,
    pub bind_addr: String,
}

impl Settings {
    /// Load settings from `STAC_AUTH_PROXY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a
    /// JSON-encoded/regex-bearing variable fails to parse — fatal at
    /// startup only (spec §7 `ConfigInvalid`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let upstream_url =
            env_var("UPSTREAM_URL").ok_or(ConfigError::MissingVar("UPSTREAM_URL"))?;
        let oidc_discovery_url = env_var("OIDC_DISCOVERY_URL")
            .ok_or(ConfigError::MissingVar("OIDC_DISCOVERY_URL"))?;
        let oidc_discovery_internal_url = env_var("OIDC_DISCOVERY_INTERNAL_URL");

        let allowed_jwt_audiences = parse_json_var("ALLOWED_JWT_AUDIENCES")?.unwrap_or_default();

        let default_public = env_var("DEFAULT_PUBLIC")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let private_endpoints = parse_json_var("PRIVATE_ENDPOINTS")?.unwrap_or_else(default_private_endpoints);
        let public_endpoints = parse_json_var("PUBLIC_ENDPOINTS")?.unwrap_or_default();

        let items_filter = parse_json_var("ITEMS_FILTER")?;
        let collections_filter = parse_json_var("COLLECTIONS_FILTER")?;

        let openapi_spec_endpoint = env_var("OPENAPI_SPEC_ENDPOINT");
        let healthz_prefix = env_var("HEALTHZ_PREFIX").unwrap_or_else(|| "/healthz".to_string());
        let base_path = env_var("BASE_PATH").unwrap_or_default();
        let root_path = env_var("ROOT_PATH").unwrap_or_default();

        let wait_for_upstream = env_var("WAIT_FOR_UPSTREAM")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);
        let check_conformance = env_var("CHECK_CONFORMANCE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let cors = parse_json_var("CORS")?.unwrap_or_default();

        let bind_addr = env_var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());

        Ok(Settings {
            upstream_url,
            oidc_discovery_url,
            oidc_discovery_internal_url,
            allowed_jwt_audiences,
            default_public,
            private_endpoints,
            public_endpoints,
            items_filter,
            collections_filter,
            openapi_spec_endpoint,
            healthz_prefix,
            base_path,
            root_path,
            wait_for_upstream,
            check_conformance,
            cors,
            proxy_name: "stac-auth-proxy".to_string(),
            upstream_timeout_secs: 15,
            oidc_timeout_secs: 5,
            emit_legacy_forwarded_headers: true,
            bind_addr,
        })
    }
}

fn parse_json_var<T: for<'de> Deserialize<'de>>(
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env_var(name) else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            name,
            source: anyhow::Error::new(e),
        })
}

/// Mirrors the original's default private map for the STAC transaction
/// extension endpoints (`config.py`), kept as the out-of-the-box default so
/// an operator who sets nothing still gets write protection.
fn default_private_endpoints() -> EndpointMethods {
    let entry = |method: &str| MethodEntry {
        method: method.to_string(),
        required_scopes: Vec::new(),
    };
    HashMap::from([
        (r"^/collections$".to_string(), vec![entry("POST")]),
        (
            r"^/collections/[^/]+$".to_string(),
            vec![entry("PUT"), entry("PATCH"), entry("DELETE")],
        ),
        (
            r"^/collections/[^/]+/items$".to_string(),
            vec![entry("POST")],
        ),
        (
            r"^/collections/[^/]+/items/[^/]+$".to_string(),
            vec![entry("PUT"), entry("PATCH"), entry("DELETE")],
        ),
        (
            r"^/collections/[^/]+/bulk_items$".to_string(),
            vec![entry("POST")],
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_entry_accepts_plain_and_scoped_forms() {
        let parsed: Vec<MethodEntry> =
            serde_json::from_str(r#"["GET", ["POST", ["collections:create"]]]"#).unwrap();
        assert_eq!(parsed[0].method, "GET");
        assert!(parsed[0].required_scopes.is_empty());
        assert_eq!(parsed[1].method, "POST");
        assert_eq!(parsed[1].required_scopes, vec!["collections:create"]);
    }

    #[test]
    fn filter_config_parses_template_variant() {
        let parsed: FilterConfig =
            serde_json::from_str(r#"{"kind": "template", "template": "true"}"#).unwrap();
        assert!(matches!(parsed, FilterConfig::Template { template } if template == "true"));
    }
}
