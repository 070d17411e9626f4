use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation identifier minted on the capture side and echoed by every
/// later message about the same request. Any non-empty wire token is a
/// valid id; freshly minted ones are v4 UUIDs.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Which side of a request a stored body belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyDirection {
    Request,
    Response,
}

impl BodyDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyDirection::Request => "request",
            BodyDirection::Response => "response",
        }
    }
}

/// How a request was issued by the page.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Fetch,
    Xhr,
    Document,
    #[default]
    Other,
}

impl RequestKind {
    /// Lenient wire decoding; anything unrecognized comes back as `Other`
    /// so a stale capture script can never wedge the receiving side.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "fetch" => RequestKind::Fetch,
            "xhr" => RequestKind::Xhr,
            "document" => RequestKind::Document,
            _ => RequestKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Fetch => "fetch",
            RequestKind::Xhr => "xhr",
            RequestKind::Document => "document",
            RequestKind::Other => "other",
        }
    }
}

/// Out-of-band sink for full request and response bodies. Previews travel
/// with the capture messages; anything beyond the preview budget reaches
/// consumers only through a sink.
///
/// Implementations must return quickly and swallow their own failures; the
/// capture path fires and forgets.
pub trait BodySink: Send + Sync {
    fn submit(&self, id: &RequestId, direction: BodyDirection, body: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn unknown_kind_falls_back_to_other() {
        assert_eq!(RequestKind::from_wire("fetch"), RequestKind::Fetch);
        assert_eq!(RequestKind::from_wire("xhr"), RequestKind::Xhr);
        assert_eq!(RequestKind::from_wire("document"), RequestKind::Document);
        assert_eq!(RequestKind::from_wire("websocket"), RequestKind::Other);
        assert_eq!(RequestKind::from_wire(""), RequestKind::Other);
    }

    #[test]
    fn direction_names_are_stable() {
        assert_eq!(BodyDirection::Request.as_str(), "request");
        assert_eq!(BodyDirection::Response.as_str(), "response");
    }
}
