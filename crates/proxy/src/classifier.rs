//! Endpoint classification: `(path, method) -> MatchResult` (spec §4.1).
//!
//! Rule regexes are compiled once at startup from `Settings` and never
//! recompiled per request, mirroring the base gateway's pattern of
//! compiling config-driven regexes during construction rather than on the
//! hot path.

use crate::config::{EndpointMethods, MethodEntry, Settings};
use crate::errors::ConfigError;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub is_private: bool,
    pub required_scopes: Vec<String>,
}

struct CompiledRule {
    pattern: Regex,
    methods: Vec<MethodEntry>,
}

/// Which rule set is consulted depends on `default_public` (spec §4.1
/// invariant: exactly one of the two sets is consulted per request).
enum Consult {
    Private(Vec<CompiledRule>),
    Public(Vec<CompiledRule>),
}

pub struct EndpointClassifier {
    default_public: bool,
    consult: Consult,
}

impl EndpointClassifier {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPattern` if a configured pattern is not
    /// a valid regex.
    pub fn new(settings: &Settings) -> Result<Self, ConfigError> {
        let consult = if settings.default_public {
            Consult::Private(compile_rules(&settings.private_endpoints)?)
        } else {
            Consult::Public(compile_rules(&settings.public_endpoints)?)
        };
        Ok(Self {
            default_public: settings.default_public,
            consult,
        })
    }

    /// Classify a request. `OPTIONS` is always public regardless of rule
    /// configuration so CORS preflights are never rejected by the auth
    /// enforcer (grounded in the original's `AuthOptionsMiddleware`).
    #[must_use]
    pub fn classify(&self, path: &str, method: &str) -> MatchResult {
        if method.eq_ignore_ascii_case("OPTIONS") {
            return MatchResult {
                is_private: false,
                required_scopes: Vec::new(),
            };
        }

        let rules = match &self.consult {
            Consult::Private(rules) | Consult::Public(rules) => rules,
        };
        let consulting_private = matches!(self.consult, Consult::Private(_));

        for rule in rules {
            if !full_match(&rule.pattern, path) {
                continue;
            }
            for entry in &rule.methods {
                if entry.method.eq_ignore_ascii_case(method) {
                    return if consulting_private {
                        MatchResult {
                            is_private: true,
                            required_scopes: entry.required_scopes.clone(),
                        }
                    } else {
                        MatchResult {
                            is_private: false,
                            required_scopes: Vec::new(),
                        }
                    };
                }
            }
        }

        MatchResult {
            is_private: !self.default_public,
            required_scopes: Vec::new(),
        }
    }
}

fn full_match(re: &Regex, path: &str) -> bool {
    re.find(path).is_some_and(|m| m.start() == 0 && m.end() == path.len())
}

fn compile_rules(endpoints: &EndpointMethods) -> Result<Vec<CompiledRule>, ConfigError> {
    endpoints
        .iter()
        .map(|(pattern, methods)| {
            Regex::new(pattern)
                .map(|re| CompiledRule {
                    pattern: re,
                    methods: methods.clone(),
                })
                .map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}
