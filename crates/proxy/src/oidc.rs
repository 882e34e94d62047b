//! RS256 JWT validation with JWKS fetch/cache/rotation (spec §4.2).
//!
//! Adapted from the base gateway's `oidc.rs`: same `Inner`/`JwksCache`
//! double-checked-locking refresh strategy, extended with a stored
//! discovery-document snapshot (needed for the Authentication Extension
//! mutator) and an internal discovery URL override so the proxy can reach
//! the IdP through a cluster-private address while clients see the public
//! one.

use anyhow::Context as _;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// The discovery document fields the proxy cares about (spec §6 "OIDC").
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct OidcMetadata {
    pub jwks_uri: String,
    pub authorization_endpoint: Option<String>,
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
}

#[derive(Clone)]
pub struct OidcValidator {
    inner: Arc<Inner>,
}

struct Inner {
    discovery_url: String,
    discovery_internal_url: Option<String>,
    audiences: Vec<String>,
    leeway_secs: u64,
    refresh_after: Duration,
    timeout: Duration,
    http: reqwest::Client,
    metadata: RwLock<Option<Arc<OidcMetadata>>>,
    jwks: RwLock<JwksCache>,
}

#[derive(Clone, Default)]
struct JwksCache {
    next_refresh_after: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
    keys_by_kid: HashMap<String, DecodingKey>,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub discovery_url: String,
    pub discovery_internal_url: Option<String>,
    pub audiences: Vec<String>,
    pub leeway_secs: u64,
    pub jwks_refresh_secs: u64,
    pub timeout_secs: u64,
}

impl OidcValidator {
    #[must_use]
    pub fn new(http: reqwest::Client, cfg: OidcConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                discovery_url: cfg.discovery_url,
                discovery_internal_url: cfg.discovery_internal_url,
                audiences: cfg.audiences,
                leeway_secs: cfg.leeway_secs,
                refresh_after: Duration::from_secs(cfg.jwks_refresh_secs.max(5)),
                timeout: Duration::from_secs(cfg.timeout_secs.max(1)),
                http,
                metadata: RwLock::new(None),
                jwks: RwLock::new(JwksCache::default()),
            }),
        }
    }

    /// Fetch (or return the cached copy of) the discovery document. Fetched
    /// once at first use and treated as immutable for the process lifetime
    /// (spec §5 "Shared resources").
    pub async fn metadata(&self) -> anyhow::Result<Arc<OidcMetadata>> {
        {
            let cached = self.inner.metadata.read().await;
            if let Some(meta) = cached.as_ref() {
                return Ok(meta.clone());
            }
        }

        let origin = self
            .inner
            .discovery_internal_url
            .as_deref()
            .unwrap_or(&self.inner.discovery_url);
        let mut doc = fetch_discovery(&self.inner.http, origin, self.inner.timeout).await?;
        rewrite_jwks_netloc_if_needed(&mut doc, origin, &self.inner.discovery_url);
        let doc = Arc::new(doc);

        let mut cached = self.inner.metadata.write().await;
        if let Some(existing) = cached.as_ref() {
            return Ok(existing.clone());
        }
        *cached = Some(doc.clone());
        Ok(doc)
    }

    /// Validate a JWT and return its claims as JSON. Only RS256 is
    /// accepted (spec §4.2).
    pub async fn validate(&self, jwt: &str) -> anyhow::Result<serde_json::Value> {
        let header = jsonwebtoken::decode_header(jwt).context("decode jwt header")?;
        if jwt_has_crit_header(jwt)? {
            anyhow::bail!("unsupported jwt crit header");
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing jwt kid"))?;
        if header.alg != Algorithm::RS256 {
            anyhow::bail!("unsupported jwt alg (expected RS256)");
        }

        if let Some(key) = self.get_key_if_present(kid).await
            && let Ok(claims) = self.decode_with_key(jwt, &key)
        {
            return Ok(claims);
        }

        self.refresh_jwks_if_needed(Some(kid)).await?;

        let key = self
            .get_key_if_present(kid)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown jwt kid"))?;

        self.decode_with_key(jwt, &key)
    }

    fn decode_with_key(&self, jwt: &str, key: &DecodingKey) -> anyhow::Result<serde_json::Value> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.inner.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // Audience validation is performed iff an allowlist is configured
        // (spec §4.2); jsonwebtoken requires explicitly disabling it.
        validation.validate_aud = !self.inner.audiences.is_empty();

        if !self.inner.audiences.is_empty() {
            let aud: Vec<&str> = self.inner.audiences.iter().map(String::as_str).collect();
            validation.set_audience(&aud);
        }

        let data = jsonwebtoken::decode::<serde_json::Value>(jwt, key, &validation)
            .context("decode jwt")?;
        Ok(data.claims)
    }

    async fn get_key_if_present(&self, kid: &str) -> Option<DecodingKey> {
        let cache = self.inner.jwks.read().await;
        cache.keys_by_kid.get(kid).cloned()
    }

    async fn refresh_jwks_if_needed(&self, maybe_kid: Option<&str>) -> anyhow::Result<()> {
        let now = Instant::now();

        {
            let cache = self.inner.jwks.read().await;
            if !needs_refresh(&cache, now, maybe_kid) {
                return Ok(());
            }
        }

        let mut cache = self.inner.jwks.write().await;
        if !needs_refresh(&cache, now, maybe_kid) {
            return Ok(());
        }

        if let Some(last) = cache.last_refresh_attempt
            && now.duration_since(last) < MIN_REFRESH_INTERVAL
        {
            return Ok(());
        }
        cache.last_refresh_attempt = Some(now);

        let meta = self.metadata().await?;
        let (keys_by_kid, cache_ttl) = fetch_jwks(&self.inner.http, &meta.jwks_uri, self.inner.timeout).await?;
        cache.keys_by_kid = keys_by_kid;
        cache.next_refresh_after = Some(now + cache_ttl.unwrap_or(self.inner.refresh_after));

        Ok(())
    }
}

fn needs_refresh(cache: &JwksCache, now: Instant, maybe_kid: Option<&str>) -> bool {
    let stale = cache.next_refresh_after.is_none_or(|t| now >= t);
    let missing = maybe_kid.is_some_and(|kid| !cache.keys_by_kid.contains_key(kid));
    stale || missing
}

async fn fetch_discovery(http: &reqwest::Client, origin: &str, timeout: Duration) -> anyhow::Result<OidcMetadata> {
    let resp = http
        .get(origin)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET discovery {origin}"))?
        .error_for_status()
        .with_context(|| format!("discovery status {origin}"))?;
    let doc: OidcMetadata = resp.json().await.context("parse discovery json")?;
    if doc.jwks_uri.trim().is_empty() {
        anyhow::bail!("discovery returned empty jwks_uri");
    }
    Ok(doc)
}

/// When the `jwks_uri` the IdP announced has a different hostname than the
/// discovery URL we actually used, and an internal override is active,
/// rewrite it to the internal netloc (spec §4.2) so the proxy keeps talking
/// to the cluster-private address end to end.
fn rewrite_jwks_netloc_if_needed(doc: &mut OidcMetadata, origin_used: &str, public_discovery_url: &str) {
    if origin_used == public_discovery_url {
        return;
    }
    let (Ok(origin_parsed), Ok(public_parsed), Ok(mut jwks_parsed)) = (
        reqwest::Url::parse(origin_used),
        reqwest::Url::parse(public_discovery_url),
        reqwest::Url::parse(&doc.jwks_uri),
    ) else {
        return;
    };
    if jwks_parsed.host_str() != public_parsed.host_str() {
        return;
    }
    let _ = jwks_parsed.set_scheme(origin_parsed.scheme());
    let _ = jwks_parsed.set_host(origin_parsed.host_str());
    let _ = jwks_parsed.set_port(origin_parsed.port());
    doc.jwks_uri = jwks_parsed.to_string();
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

async fn fetch_jwks(
    http: &reqwest::Client,
    jwks_uri: &str,
    timeout: Duration,
) -> anyhow::Result<(HashMap<String, DecodingKey>, Option<Duration>)> {
    let resp = http
        .get(jwks_uri)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET jwks {jwks_uri}"))?
        .error_for_status()
        .with_context(|| format!("jwks status {jwks_uri}"))?;

    let cache_ttl = parse_cache_control_max_age(resp.headers());
    let jwks: JwksResponse = resp.json().await.context("parse jwks json")?;

    let mut out: HashMap<String, DecodingKey> = HashMap::new();
    for k in jwks.keys {
        if k.kty != "RSA" {
            continue;
        }
        if let Some(use_) = &k.use_
            && use_ != "sig"
        {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (k.kid, k.n, k.e) else {
            continue;
        };
        let key = DecodingKey::from_rsa_components(&n, &e).context("build rsa decoding key")?;
        out.insert(kid, key);
    }

    if out.is_empty() {
        anyhow::bail!("jwks contains no usable RSA keys");
    }

    Ok((out, cache_ttl))
}

fn parse_cache_control_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let v = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    v.split(',')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("max-age=")?.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn jwt_has_crit_header(jwt: &str) -> anyhow::Result<bool> {
    let mut parts = jwt.split('.');
    let header_b64 = parts
        .next()
        .ok_or_else(|| anyhow::anyhow!("invalid jwt (missing header part)"))?;
    if parts.next().is_none() {
        anyhow::bail!("invalid jwt (missing payload part)");
    }
    if parts.next().is_none() {
        anyhow::bail!("invalid jwt (missing signature part)");
    }
    if parts.next().is_some() {
        anyhow::bail!("invalid jwt (unexpected extra parts)");
    }

    let header_json = URL_SAFE_NO_PAD
        .decode(header_b64)
        .context("base64url decode jwt header")?;
    let header: serde_json::Value =
        serde_json::from_slice(&header_json).context("parse jwt header json")?;

    let header = header
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("invalid jwt header (expected JSON object)"))?;
    Ok(header.contains_key("crit"))
}
