//! In-process OIDC discovery/JWKS issuer for integration tests.
//!
//! Grounded on `original_source/examples/mock_oidc_server/app.py`: generate
//! an RSA keypair once, serve it as a JWKS under a fixed `kid`, and hand out
//! a `.well-known/openid-configuration` document pointing back at this
//! process's own address. Unlike the Python original this never persists
//! the keypair to disk; every test run gets a fresh one.

use anyhow::Context as _;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{EncodingKey, Header};
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey as _;
use rsa::traits::PublicKeyParts as _;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const KEY_ID: &str = "mock-key-1";
const KEY_BITS: usize = 2048;

struct Inner {
    issuer: String,
    encoding_key: EncodingKey,
    jwks: Value,
}

/// A running mock OIDC issuer. Dropping this does not stop the server;
/// tests are expected to run for the process lifetime of a `#[tokio::test]`
/// and let the listener close naturally when the runtime shuts down.
pub struct MockOidc {
    inner: Arc<Inner>,
}

impl MockOidc {
    /// Generates a keypair, starts the issuer on an ephemeral localhost
    /// port, and returns once it's accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation, PEM encoding, or binding the
    /// listener fails.
    pub async fn start() -> anyhow::Result<Self> {
        let private_key =
            RsaPrivateKey::new(&mut rand::rngs::OsRng, KEY_BITS).context("generate rsa keypair")?;
        let pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .context("encode private key as pkcs1 pem")?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).context("load rsa signing key")?;

        let n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
        let jwks = json!({
            "keys": [{
                "kty": "RSA",
                "use": "sig",
                "kid": KEY_ID,
                "alg": "RS256",
                "n": n,
                "e": e,
            }]
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind mock oidc listener")?;
        let addr = listener.local_addr().context("mock oidc local_addr")?;
        let issuer = format!("http://{addr}");

        let inner = Arc::new(Inner { issuer, encoding_key, jwks });

        let router = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/.well-known/jwks.json", get(jwks_handler))
            .with_state(inner.clone());

        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self { inner })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.inner.issuer
    }

    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.inner.issuer)
    }

    /// Signs an RS256 JWT with the given `scope` and any extra claims
    /// merged in, defaulting `iss`/`iat`/`exp`/`sub` the way the Python
    /// mock issuer's `/token` endpoint does.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn sign_jwt(&self, scope: &str, extra_claims: Option<Value>) -> anyhow::Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs();
        let mut claims = json!({
            "iss": self.inner.issuer,
            "sub": "user123",
            "iat": now,
            "exp": now + 900,
            "scope": scope,
        });
        if let Some(extra) = extra_claims
            && let (Some(base), Some(extra)) = (claims.as_object_mut(), extra.as_object())
        {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }

        let mut header = Header::new(jsonwebtoken::Algorithm::RS256);
        header.kid = Some(KEY_ID.to_string());
        jsonwebtoken::encode(&header, &claims, &self.inner.encoding_key).context("sign jwt")
    }
}

async fn discovery(State(inner): State<Arc<Inner>>) -> Json<Value> {
    Json(json!({
        "issuer": inner.issuer,
        "authorization_endpoint": format!("{}/authorize", inner.issuer),
        "token_endpoint": format!("{}/token", inner.issuer),
        "jwks_uri": format!("{}/.well-known/jwks.json", inner.issuer),
        "response_types_supported": ["code"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": ["openid", "profile", "collections:create", "items:create"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
        "code_challenge_methods_supported": ["S256"],
    }))
}

async fn jwks_handler(State(inner): State<Arc<Inner>>) -> Json<Value> {
    Json(inner.jwks.clone())
}
