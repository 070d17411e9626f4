//! The per-request read model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use probe_bridge::StartEvent;
use stack_normalizer::StackFrame;
use webtap_core_types::{RequestId, RequestKind};

use crate::classify::{classify, ContentCategory};

/// Lifecycle phase, derived from the settled fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPhase {
    Pending,
    Succeeded,
    Failed,
}

/// One observed request, correlated across its start and settle events.
/// Everything derivable (duration, phase, mixed content, category) is
/// computed on read and never stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub method: String,
    pub url: String,
    pub kind: RequestKind,
    pub request_headers: BTreeMap<String, String>,
    pub request_body_preview: Option<String>,
    pub stack_frames: Vec<StackFrame>,
    pub started_at: DateTime<Utc>,
    pub page_was_secure: bool,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub response_headers: BTreeMap<String, String>,
    pub response_body_preview: Option<String>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RequestRecord {
    pub(crate) fn open(event: StartEvent, page_was_secure: bool, started_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id,
            method: event.method,
            url: event.url,
            kind: event.kind,
            request_headers: event.headers,
            request_body_preview: event.body_preview,
            stack_frames: event.stack_frames,
            started_at,
            page_was_secure,
            status: None,
            status_text: None,
            response_headers: BTreeMap::new(),
            response_body_preview: None,
            error: None,
            completed_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn phase(&self) -> RequestPhase {
        if self.completed_at.is_none() {
            RequestPhase::Pending
        } else if self.error.is_some() {
            RequestPhase::Failed
        } else {
            RequestPhase::Succeeded
        }
    }

    /// Wall-clock latency, available once settled.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }

    /// A secure page reaching out over plain http.
    pub fn is_mixed_content(&self) -> bool {
        self.page_was_secure && self.url.starts_with("http://")
    }

    /// Semantic category of the response payload.
    pub fn content_category(&self) -> ContentCategory {
        classify(&self.response_headers, self.response_body_preview.as_deref())
    }
}
