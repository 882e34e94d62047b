//! Per-request state threaded through the middleware chain via axum request
//! extensions (spec §3 "Request context").

use crate::oidc::OidcMetadata;
use serde_json::Value;
use stac_auth_proxy_cql2::Expr;
use std::sync::Arc;

/// Carried alongside each in-flight request; dropped when the request
/// completes (no cross-request caching of claims or filters).
#[derive(Clone, Default)]
pub struct RequestContext {
    /// Present iff a valid token was presented.
    pub claims: Option<Value>,
    /// The caller-specific CQL2 predicate attached by the filter builder.
    pub cql2_filter: Option<Expr>,
    /// The discovery document snapshot in effect, once fetched.
    pub oidc_metadata: Option<Arc<OidcMetadata>>,
    /// The client-visible base URL, derived from `Forwarded`/
    /// `X-Forwarded-*` headers, falling back to `Host`.
    pub base_url: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        has_scope(self.claims.as_ref(), scope)
    }
}

/// Space-separated OAuth2 scope claim lookup, shared by the claims carried
/// on a `RequestContext` (post-auth requests) and the bare claims a filter
/// plugin receives in its `FilterContext` (spec §3, §4.2, §4.3 all check
/// scope membership the same way).
#[must_use]
pub fn scope_str(claims: Option<&Value>) -> Option<&str> {
    claims?.get("scope").and_then(Value::as_str)
}

#[must_use]
pub fn has_scope(claims: Option<&Value>, scope: &str) -> bool {
    scope_str(claims).is_some_and(|scopes| scopes.split_whitespace().any(|s| s == scope))
}
