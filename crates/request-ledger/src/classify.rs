//! Semantic payload classification for the read model.
//!
//! The declared `content-type` header wins when it is specific enough;
//! otherwise the first characters of the stored preview are sniffed. Pure
//! functions, no state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Categories the presentation layer renders differently.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentCategory {
    Json,
    Html,
    Xml,
    Javascript,
    Css,
    Image,
    Text,
    Binary,
    Unknown,
}

/// Classify a response from its headers and, failing that, its preview.
pub fn classify(
    headers: &BTreeMap<String, String>,
    body_prefix: Option<&str>,
) -> ContentCategory {
    if let Some(essence) = content_type_essence(headers) {
        let category = from_essence(&essence);
        if category != ContentCategory::Unknown {
            return category;
        }
    }
    body_prefix.map(sniff_prefix).unwrap_or(ContentCategory::Unknown)
}

/// The `content-type` value with parameters stripped and lowercased.
/// Header name lookup is case-insensitive; stored casing is whatever the
/// wire carried.
fn content_type_essence(headers: &BTreeMap<String, String>) -> Option<String> {
    let value = headers
        .iter()
        .find_map(|(name, value)| name.eq_ignore_ascii_case("content-type").then_some(value))?;
    let essence = value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_ascii_lowercase();
    (!essence.is_empty()).then_some(essence)
}

fn from_essence(essence: &str) -> ContentCategory {
    match essence {
        "application/json" => ContentCategory::Json,
        "text/html" | "application/xhtml+xml" => ContentCategory::Html,
        "text/xml" | "application/xml" => ContentCategory::Xml,
        "text/javascript" | "application/javascript" | "application/x-javascript" => {
            ContentCategory::Javascript
        }
        "text/css" => ContentCategory::Css,
        "application/octet-stream" => ContentCategory::Binary,
        _ if essence.starts_with("image/") => ContentCategory::Image,
        _ if essence.ends_with("+json") => ContentCategory::Json,
        _ if essence.ends_with("+xml") => ContentCategory::Xml,
        _ if essence.starts_with("text/") => ContentCategory::Text,
        _ => ContentCategory::Unknown,
    }
}

fn sniff_prefix(prefix: &str) -> ContentCategory {
    let trimmed = prefix.trim_start();
    if trimmed.is_empty() {
        return ContentCategory::Unknown;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return ContentCategory::Json;
    }
    let head: String = trimmed.chars().take(64).collect::<String>().to_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return ContentCategory::Html;
    }
    if head.starts_with("<?xml") {
        return ContentCategory::Xml;
    }
    if trimmed
        .chars()
        .take(512)
        .any(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
    {
        return ContentCategory::Binary;
    }
    ContentCategory::Text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(content_type: &str) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("Content-Type".to_string(), content_type.to_string());
        map
    }

    #[test]
    fn declared_types_win() {
        assert_eq!(classify(&headers("application/json"), None), ContentCategory::Json);
        assert_eq!(classify(&headers("text/html"), None), ContentCategory::Html);
        assert_eq!(classify(&headers("image/png"), None), ContentCategory::Image);
        assert_eq!(classify(&headers("text/css"), None), ContentCategory::Css);
        assert_eq!(
            classify(&headers("application/octet-stream"), None),
            ContentCategory::Binary
        );
    }

    #[test]
    fn parameters_are_stripped() {
        assert_eq!(
            classify(&headers("application/json; charset=utf-8"), None),
            ContentCategory::Json
        );
    }

    #[test]
    fn suffix_types_map_to_their_family() {
        assert_eq!(
            classify(&headers("application/vnd.api+json"), None),
            ContentCategory::Json
        );
        assert_eq!(classify(&headers("image/svg+xml"), None), ContentCategory::Image);
        assert_eq!(classify(&headers("application/atom+xml"), None), ContentCategory::Xml);
    }

    #[test]
    fn header_name_lookup_ignores_case() {
        let mut map = BTreeMap::new();
        map.insert("content-TYPE".to_string(), "text/plain".to_string());
        assert_eq!(classify(&map, None), ContentCategory::Text);
    }

    #[test]
    fn missing_header_falls_back_to_sniffing() {
        let empty = BTreeMap::new();
        assert_eq!(classify(&empty, Some(r#"{"a":1}"#)), ContentCategory::Json);
        assert_eq!(classify(&empty, Some("  [1,2,3]")), ContentCategory::Json);
        assert_eq!(
            classify(&empty, Some("<!DOCTYPE html><html>")),
            ContentCategory::Html
        );
        assert_eq!(
            classify(&empty, Some("<?xml version=\"1.0\"?>")),
            ContentCategory::Xml
        );
        assert_eq!(classify(&empty, Some("plain words")), ContentCategory::Text);
        assert_eq!(classify(&empty, Some("ab\u{0000}cd")), ContentCategory::Binary);
        assert_eq!(classify(&empty, None), ContentCategory::Unknown);
        assert_eq!(classify(&empty, Some("   ")), ContentCategory::Unknown);
    }

    #[test]
    fn unknown_declared_type_still_sniffs() {
        assert_eq!(
            classify(&headers("application/x-custom"), Some(r#"{"ok":true}"#)),
            ContentCategory::Json
        );
    }
}
