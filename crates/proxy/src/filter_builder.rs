//! Filter builder plugin registry (spec §4.3, design note §9).
//!
//! The original loads `{cls, args, kwargs}` descriptors via dynamic module
//! import; that's a security liability, so this is a closed, typed registry
//! instead — each `FilterConfig` variant compiles into a `FilterPlugin` once
//! at startup. Two plugins are provided: a `minijinja` expression template
//! (the original's Jinja2 predicate templates, re-grounded in a Rust
//! template engine already present in the retrieval pack) and a
//! scope-based predicate that needs no scripting at all.

use crate::config::FilterConfig;
use crate::errors::{ConfigError, ProxyError};
use crate::oidc::OidcMetadata;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use stac_auth_proxy_cql2::Expr;
use std::collections::HashMap;
use std::sync::Arc;

/// The context a filter plugin receives (spec §3 "Filter builder").
#[derive(Debug, Clone, Serialize)]
pub struct FilterContext {
    pub req: ReqInfo,
    pub claims: Option<Value>,
    pub oidc_metadata: Option<Arc<OidcMetadata>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReqInfo {
    pub path: String,
    pub method: String,
    pub query_params: HashMap<String, String>,
    pub path_params: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

#[async_trait]
pub trait FilterPlugin: Send + Sync {
    /// Returns `None` when the caller is unrestricted ("no restriction for
    /// this caller", spec §3).
    async fn build(&self, ctx: &FilterContext) -> Result<Option<Expr>, ProxyError>;
}

struct TemplatePlugin {
    env: minijinja::Environment<'static>,
}

#[async_trait]
impl FilterPlugin for TemplatePlugin {
    async fn build(&self, ctx: &FilterContext) -> Result<Option<Expr>, ProxyError> {
        let tmpl = self.env.get_template("filter").map_err(|_| ProxyError::InvalidFilter)?;
        let rendered = tmpl.render(ctx).map_err(|_| ProxyError::InvalidFilter)?;
        let text = rendered.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let expr = stac_auth_proxy_cql2::parse_text(text).map_err(|_| ProxyError::InvalidFilter)?;
        Ok(Some(expr))
    }
}

struct ScopeBasedPlugin {
    scope: String,
    filter_if_present: String,
    filter_if_absent: String,
}

#[async_trait]
impl FilterPlugin for ScopeBasedPlugin {
    async fn build(&self, ctx: &FilterContext) -> Result<Option<Expr>, ProxyError> {
        let text = if crate::context::has_scope(ctx.claims.as_ref(), &self.scope) {
            &self.filter_if_present
        } else {
            &self.filter_if_absent
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let expr = stac_auth_proxy_cql2::parse_text(text).map_err(|_| ProxyError::InvalidFilter)?;
        Ok(Some(expr))
    }
}

impl FilterConfig {
    /// Compile this descriptor into a runnable plugin. Done once at startup
    /// (spec §4.3 "Endpoint rules are compiled once at startup").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `template` variant's source fails to
    /// parse as a minijinja template.
    pub fn compile(&self) -> Result<Arc<dyn FilterPlugin>, ConfigError> {
        match self {
            FilterConfig::Template { template } => {
                let mut env = minijinja::Environment::new();
                // Templates are configuration, loaded once; leaking the
                // owned source ties its lifetime to the process, which is
                // what `Environment` requires for a borrowed template.
                let leaked: &'static str = Box::leak(template.clone().into_boxed_str());
                env.add_template("filter", leaked)
                    .map_err(|e| ConfigError::InvalidValue {
                        name: "ITEMS_FILTER/COLLECTIONS_FILTER",
                        source: anyhow::Error::new(e),
                    })?;
                Ok(Arc::new(TemplatePlugin { env }))
            }
            FilterConfig::ScopeBased {
                scope,
                filter_if_present,
                filter_if_absent,
            } => Ok(Arc::new(ScopeBasedPlugin {
                scope: scope.clone(),
                filter_if_present: filter_if_present.clone(),
                filter_if_absent: filter_if_absent.clone(),
            })),
        }
    }
}
