//! Shared accumulate/decompress/transform/recompress protocol for response
//! mutators (spec §4.6). Grounded on the original's `JsonResponseMiddleware`
//! base class: buffer the whole body, decode it, hand the parsed value to a
//! callback, re-encode, fix `Content-Length`.

use async_compression::tokio::bufread::{BrotliDecoder, BrotliEncoder, GzipDecoder, GzipEncoder};
use async_compression::tokio::bufread::{DeflateDecoder, DeflateEncoder};
use axum::body::{Body, Bytes, to_bytes};
use axum::http::{HeaderValue, header};
use axum::response::Response;
use serde_json::Value;
use tokio::io::AsyncReadExt;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Gzip,
    Deflate,
    Brotli,
}

impl Encoding {
    fn from_header(value: &str) -> Option<Self> {
        match value.trim() {
            "gzip" => Some(Encoding::Gzip),
            "deflate" => Some(Encoding::Deflate),
            "br" => Some(Encoding::Brotli),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Brotli => "br",
        }
    }
}

/// Transform a JSON response body in place if `transform` produces `Some`.
///
/// `content_type_matches` gates whether the body is even worth decoding;
/// `transform` returning `None` leaves the body untouched (used when a
/// mutator determines, after inspecting the parsed JSON, that nothing needs
/// to change).
pub async fn mutate_json_response<F>(resp: Response, content_type_matches: bool, transform: F) -> Response
where
    F: FnOnce(Value) -> Option<Value>,
{
    if !resp.status().is_success() || !content_type_matches {
        return resp;
    }

    let (mut parts, body) = resp.into_parts();
    let encoding = parts
        .headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .and_then(Encoding::from_header);

    let raw = match to_bytes(body, 256 * 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let decoded = match decode(&raw, encoding).await {
        Ok(d) => d,
        Err(_) => return Response::from_parts(parts, Body::from(raw)),
    };

    let Ok(value) = serde_json::from_slice::<Value>(&decoded) else {
        return Response::from_parts(parts, Body::from(raw));
    };

    let Some(transformed) = transform(value) else {
        return Response::from_parts(parts, Body::from(raw));
    };

    let Ok(new_plain) = serde_json::to_vec(&transformed) else {
        return Response::from_parts(parts, Body::from(raw));
    };

    let new_bytes = match encode(&new_plain, encoding).await {
        Ok(b) => b,
        Err(_) => new_plain,
    };

    if let Ok(len) = HeaderValue::from_str(&new_bytes.len().to_string()) {
        parts.headers.insert(header::CONTENT_LENGTH, len);
    }
    Response::from_parts(parts, Body::from(new_bytes))
}

async fn decode(raw: &Bytes, encoding: Option<Encoding>) -> std::io::Result<Vec<u8>> {
    let Some(encoding) = encoding else {
        return Ok(raw.to_vec());
    };
    let mut out = Vec::new();
    match encoding {
        Encoding::Gzip => GzipDecoder::new(&raw[..]).read_to_end(&mut out).await?,
        Encoding::Deflate => DeflateDecoder::new(&raw[..]).read_to_end(&mut out).await?,
        Encoding::Brotli => BrotliDecoder::new(&raw[..]).read_to_end(&mut out).await?,
    };
    Ok(out)
}

async fn encode(plain: &[u8], encoding: Option<Encoding>) -> std::io::Result<Vec<u8>> {
    let Some(encoding) = encoding else {
        return Ok(plain.to_vec());
    };
    let mut out = Vec::new();
    match encoding {
        Encoding::Gzip => GzipEncoder::new(plain).read_to_end(&mut out).await?,
        Encoding::Deflate => DeflateEncoder::new(plain).read_to_end(&mut out).await?,
        Encoding::Brotli => BrotliEncoder::new(plain).read_to_end(&mut out).await?,
    };
    let _ = encoding.as_str();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn passes_through_non_json_content_type() {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from("plain text"))
            .unwrap();
        let out = mutate_json_response(resp, false, |v| Some(v)).await;
        let body = to_bytes(out.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"plain text");
    }

    #[tokio::test]
    async fn transforms_and_fixes_content_length() {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(serde_json::to_vec(&json!({"a": 1})).unwrap()))
            .unwrap();
        let out = mutate_json_response(resp, true, |v| {
            let mut v = v;
            v["b"] = json!(2);
            Some(v)
        })
        .await;
        let content_length: usize = out
            .headers()
            .get(header::CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = to_bytes(out.into_body(), 1024).await.unwrap();
        assert_eq!(body.len(), content_length);
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, json!({"a": 1, "b": 2}));
    }
}
