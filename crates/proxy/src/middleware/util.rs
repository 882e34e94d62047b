//! Small helpers shared by the request-pipeline middleware stages.

use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Since the proxy uses a catch-all route, FastAPI-style path params aren't
/// available; they're extracted from the raw path instead (grounded in the
/// original's `extract_variables`).
static PATH_PARAMS_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^/collections/(?P<collection_id>[^/]+)(?:/(?:items|bulk_items)(?:/(?P<item_id>[^/]+))?)?/?$")
        .expect("static pattern")
});

#[must_use]
pub fn extract_path_params(path: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(caps) = PATH_PARAMS_PATTERN.captures(path) {
        if let Some(m) = caps.name("collection_id") {
            out.insert("collection_id".to_string(), m.as_str().to_string());
        }
        if let Some(m) = caps.name("item_id") {
            out.insert("item_id".to_string(), m.as_str().to_string());
        }
    }
    out
}

#[must_use]
pub fn parse_query_params(query: Option<&str>) -> HashMap<String, String> {
    let Some(query) = query else {
        return HashMap::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

#[must_use]
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Walk every `links` array in a STAC document, including the ones nested
/// under `features[*]` and `collections[*]` (spec §4.6), returning mutable
/// references so callers can rewrite each link in place.
#[must_use]
pub fn collect_links_mut(value: &mut Value) -> Vec<&mut Value> {
    let mut out = Vec::new();
    collect_links_rec(value, &mut out);
    out
}

fn collect_links_rec<'a>(value: &'a mut Value, out: &mut Vec<&'a mut Value>) {
    let Value::Object(obj) = value else { return };

    for (key, val) in obj.iter_mut() {
        match key.as_str() {
            "links" => {
                if let Value::Array(links) = val {
                    out.extend(links.iter_mut());
                }
            }
            "features" | "collections" => {
                if let Value::Array(items) = val {
                    for item in items.iter_mut() {
                        collect_links_rec(item, out);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_collection_and_item_ids() {
        let p = extract_path_params("/collections/allowed/items/x123");
        assert_eq!(p.get("collection_id").map(String::as_str), Some("allowed"));
        assert_eq!(p.get("item_id").map(String::as_str), Some("x123"));
    }

    #[test]
    fn no_params_outside_collection_paths() {
        assert!(extract_path_params("/search").is_empty());
    }

    #[test]
    fn collects_links_nested_under_features_and_collections() {
        let mut doc = serde_json::json!({
            "links": [{"rel": "self", "href": "https://a/1"}],
            "features": [
                {"links": [{"rel": "self", "href": "https://a/2"}]},
            ],
            "collections": [
                {"links": [{"rel": "self", "href": "https://a/3"}]},
            ],
        });
        assert_eq!(collect_links_mut(&mut doc).len(), 3);
    }
}
