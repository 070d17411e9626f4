//! The in-page half of the observer.
//!
//! A [`PageProbe`] is installed once per page load over the two
//! request-issuing primitives. Everything about a request is captured
//! synchronously before it leaves (method, absolutized URL, flattened
//! headers, truncated body preview, caller stack), announced over the
//! bridge fire-and-forget, and matched later by a settle message carrying
//! the outcome. A capture fault of any kind is logged and swallowed; the
//! page's own request never notices the probe.

pub mod config;
pub mod fetch;
pub mod model;
pub mod xhr;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use url::Url;

use probe_bridge::{BridgeHandle, SettleEvent, StartEvent, TapMessage};
use stack_normalizer::{normalize, NormalizeOptions, StackFrame};
use webtap_core_types::{BodyDirection, BodySink, RequestId, RequestKind};

pub use crate::config::ProbeConfig;
pub use crate::fetch::{FetchPrimitive, InstrumentedFetch, NetworkFault};
pub use crate::model::{RawBody, RawHeaders, RawRequest, RawResponse};
pub use crate::xhr::XhrObserver;

use crate::model::truncate_preview;

/// Snapshot of the hosting document the probe was installed into.
#[derive(Clone, Debug)]
pub struct PageContext {
    pub base_url: Url,
    pub secure: bool,
}

impl PageContext {
    pub fn new(base_url: Url) -> Self {
        let secure = base_url.scheme() == "https";
        Self { base_url, secure }
    }
}

/// Synchronous access to the engine's current call stack.
///
/// The probe calls this on the caller's own stack, strictly before the
/// first suspension point; an implementation that defers loses the trace.
pub trait StackSource: Send + Sync {
    /// Raw trace text in whatever dialect the engine speaks.
    fn capture(&self) -> Option<String>;
}

/// Source for engines that expose no trace API.
pub struct NoopStackSource;

impl StackSource for NoopStackSource {
    fn capture(&self) -> Option<String> {
        None
    }
}

/// Everything retained about one in-flight request between its start and
/// its settlement.
pub struct CaptureTicket {
    id: RequestId,
    request_body: Option<String>,
}

impl CaptureTicket {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

/// The installed probe. One instance per page load, shared by every
/// wrapped primitive on that page.
pub struct PageProbe {
    context: PageContext,
    bridge: BridgeHandle,
    stack: Arc<dyn StackSource>,
    sink: Option<Arc<dyn BodySink>>,
    config: ProbeConfig,
}

impl PageProbe {
    /// Wrap one event-driven request; the caller forwards the primitive's
    /// terminal events to the returned observer.
    pub fn observe_xhr(self: &Arc<Self>, request: &RawRequest) -> XhrObserver {
        let ticket = self.capture_start(RequestKind::Xhr, request);
        XhrObserver::new(Arc::clone(self), ticket)
    }

    pub(crate) fn capture_start(&self, kind: RequestKind, request: &RawRequest) -> CaptureTicket {
        let id = RequestId::new();
        let stack_frames = self.capture_stack();
        let full_body = request.body.as_ref().map(|body| body.stringify());
        let body_preview = full_body
            .as_deref()
            .map(|body| truncate_preview(body, self.config.body_preview_limit));
        self.bridge.emit(TapMessage::Start(StartEvent {
            id: id.clone(),
            method: request.method_or_default(),
            url: self.resolve_url(&request.url),
            kind,
            headers: request.headers.clone().normalize(),
            body_preview,
            stack_frames,
        }));
        CaptureTicket {
            id,
            request_body: full_body,
        }
    }

    pub(crate) fn settle_success(&self, ticket: &CaptureTicket, response: &RawResponse) {
        let full_body = response.body.as_ref().map(|body| body.stringify());
        let body_preview = full_body
            .as_deref()
            .map(|body| truncate_preview(body, self.config.body_preview_limit));
        let status_text =
            (!response.status_text.is_empty()).then(|| response.status_text.clone());
        self.bridge.emit(TapMessage::Settle(SettleEvent {
            id: ticket.id.clone(),
            status: Some(response.status),
            status_text,
            headers: response.headers.clone().normalize(),
            body_preview,
            error: None,
        }));
        self.submit_bodies(ticket, full_body.as_deref());
    }

    pub(crate) fn settle_error(&self, ticket: &CaptureTicket, reason: &str) {
        self.bridge.emit(TapMessage::Settle(SettleEvent {
            id: ticket.id.clone(),
            status: None,
            status_text: None,
            headers: BTreeMap::new(),
            body_preview: None,
            error: Some(reason.to_string()),
        }));
        self.submit_bodies(ticket, None);
    }

    fn submit_bodies(&self, ticket: &CaptureTicket, response_body: Option<&str>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };
        if let Some(body) = ticket.request_body.as_deref() {
            sink.submit(&ticket.id, BodyDirection::Request, body);
        }
        if let Some(body) = response_body {
            sink.submit(&ticket.id, BodyDirection::Response, body);
        }
    }

    fn capture_stack(&self) -> Vec<StackFrame> {
        let Some(raw) = self.stack.capture() else {
            return Vec::new();
        };
        let options = NormalizeOptions {
            max_frames: self.config.max_stack_frames,
            internal_markers: self.config.internal_markers.clone(),
            base: Some(self.context.base_url.clone()),
        };
        normalize(&raw, &options)
    }

    fn resolve_url(&self, raw: &str) -> String {
        match self.context.base_url.join(raw) {
            Ok(resolved) => resolved.to_string(),
            Err(err) => {
                debug!(target: "page-probe", error = %err, raw, "url left unresolved");
                raw.to_string()
            }
        }
    }
}

/// Check-and-set installation slot, owned by one page load.
///
/// Owning the slot per page load (rather than a process-wide flag) keeps
/// re-entry within one document a no-op while a fresh document starts
/// clean; discarding the installer discards the installation with it.
pub struct ProbeInstaller {
    slot: Mutex<Option<Arc<PageProbe>>>,
}

impl ProbeInstaller {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Install once. A second call returns the existing probe untouched,
    /// so a primitive can never end up wrapped twice.
    pub fn install(
        &self,
        context: PageContext,
        bridge: BridgeHandle,
        stack: Arc<dyn StackSource>,
        sink: Option<Arc<dyn BodySink>>,
        config: ProbeConfig,
    ) -> Arc<PageProbe> {
        let mut slot = self.slot.lock();
        if let Some(existing) = slot.as_ref() {
            return Arc::clone(existing);
        }
        let probe = Arc::new(PageProbe {
            context,
            bridge,
            stack,
            sink,
            config,
        });
        *slot = Some(Arc::clone(&probe));
        probe
    }

    pub fn is_installed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl Default for ProbeInstaller {
    fn default() -> Self {
        Self::new()
    }
}
