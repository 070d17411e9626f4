//! Boundary shapes as the page's primitives hand them over, plus the
//! best-effort conversions the probe applies before anything crosses the
//! bridge. Nothing in here returns an error; a shape that refuses to
//! cooperate degrades to a placeholder.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde_json::Value;

/// Appended to a preview cut at the budget.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Request and response payloads arrive in more shapes than strings.
#[derive(Clone, Debug)]
pub enum RawBody {
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
    Form(Vec<(String, String)>),
}

impl RawBody {
    /// Best-effort stringification. Shapes that cannot be rendered come
    /// back as a bracketed type placeholder, never an error.
    pub fn stringify(&self) -> String {
        match self {
            RawBody::Text(text) => text.clone(),
            RawBody::Json(value) => {
                serde_json::to_string(value).unwrap_or_else(|_| placeholder("Json"))
            }
            RawBody::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => placeholder("Bytes"),
            },
            RawBody::Form(pairs) => pairs
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}

fn placeholder(label: &str) -> String {
    format!("[{}]", label)
}

/// Header collections also come in more than one shape.
#[derive(Clone, Debug)]
pub enum RawHeaders {
    /// Ordered name/value pairs, names may repeat.
    Pairs(Vec<(String, String)>),
    /// Plain name-to-value mapping.
    Map(BTreeMap<String, String>),
}

impl RawHeaders {
    /// Flatten into a case-preserving mapping. Repeated names fold into a
    /// comma-joined value, the usual wire convention.
    pub fn normalize(self) -> BTreeMap<String, String> {
        match self {
            RawHeaders::Map(map) => map,
            RawHeaders::Pairs(pairs) => {
                let mut map: BTreeMap<String, String> = BTreeMap::new();
                for (name, value) in pairs {
                    match map.entry(name) {
                        Entry::Occupied(mut slot) => {
                            let joined = slot.get_mut();
                            joined.push_str(", ");
                            joined.push_str(&value);
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(value);
                        }
                    }
                }
                map
            }
        }
    }
}

impl Default for RawHeaders {
    fn default() -> Self {
        RawHeaders::Pairs(Vec::new())
    }
}

/// A request as handed to one of the page's issuing primitives.
#[derive(Clone, Debug)]
pub struct RawRequest {
    pub method: Option<String>,
    pub url: String,
    pub headers: RawHeaders,
    pub body: Option<RawBody>,
}

impl RawRequest {
    /// Requests without an explicit method go out as GET; casing is
    /// normalized the way the primitives themselves do it.
    pub fn method_or_default(&self) -> String {
        self.method
            .as_deref()
            .map(|method| method.trim().to_ascii_uppercase())
            .filter(|method| !method.is_empty())
            .unwrap_or_else(|| "GET".to_string())
    }
}

/// The settled response shape the primitives hand back.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: RawHeaders,
    pub body: Option<RawBody>,
}

/// Cut `body` at `limit` characters, appending the truncation marker when
/// anything was dropped. The budget is counted in characters so multi-byte
/// text never splits mid-codepoint.
pub fn truncate_preview(body: &str, limit: usize) -> String {
    if body.chars().count() <= limit {
        return body.to_string();
    }
    let mut preview: String = body.chars().take(limit).collect();
    preview.push_str(TRUNCATION_MARKER);
    preview
}
