//! Observer for the event-driven request primitive.
//!
//! Unlike the promise-style path there is no single return value to wrap;
//! the caller forwards whichever terminal event the primitive fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use webtap_core_types::RequestId;

use crate::model::RawResponse;
use crate::{CaptureTicket, PageProbe};

/// Reason recorded when the caller aborts an in-flight request.
pub const ABORT_REASON: &str = "aborted";
/// Reason recorded when the primitive's own deadline fires.
pub const TIMEOUT_REASON: &str = "timeout";

/// Guard observing one event-driven request. The first terminal event
/// settles the record; later calls are no-ops.
pub struct XhrObserver {
    probe: Arc<PageProbe>,
    ticket: CaptureTicket,
    settled: AtomicBool,
}

impl XhrObserver {
    pub(crate) fn new(probe: Arc<PageProbe>, ticket: CaptureTicket) -> Self {
        Self {
            probe,
            ticket,
            settled: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &RequestId {
        self.ticket.id()
    }

    pub fn on_load(&self, response: &RawResponse) {
        if self.claim() {
            self.probe.settle_success(&self.ticket, response);
        }
    }

    pub fn on_error(&self, reason: &str) {
        if self.claim() {
            self.probe.settle_error(&self.ticket, reason);
        }
    }

    pub fn on_abort(&self) {
        self.on_error(ABORT_REASON);
    }

    pub fn on_timeout(&self) {
        self.on_error(TIMEOUT_REASON);
    }

    fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }
}
