//! The correlation ledger: single owner of all observed request state.
//!
//! Start and settle events arrive over the bridge in any cross-request
//! order; the ledger serializes every mutation and enforces the lifecycle:
//! a record opens Pending exactly once and settles exactly once. Duplicate
//! starts, unknown settles and repeated settles are silent no-ops, counted
//! but never propagated. Reads hand out insertion-ordered clones.

pub mod classify;
pub mod record;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use probe_bridge::{SettleEvent, StartEvent, TapMessage};
use webtap_core_types::RequestId;

pub use crate::classify::{classify, ContentCategory};
pub use crate::record::{RequestPhase, RequestRecord};

/// Capacity of the lossy lifecycle event bus.
const EVENT_BUFFER: usize = 64;

/// Aggregate view for badges and summary rows.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LedgerCounts {
    pub total: usize,
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Consistency counters. The faults themselves are silent no-ops; these
/// keep them visible to anyone who asks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct LedgerStats {
    pub started: u64,
    pub settled: u64,
    pub duplicate_starts: u64,
    pub unknown_settles: u64,
    pub duplicate_settles: u64,
    pub dropped_while_paused: u64,
}

/// Lifecycle notifications for live views. Lossy: a slow subscriber misses
/// events, it never blocks the ledger.
#[derive(Clone, Debug)]
pub enum LedgerEvent {
    Started(RequestId),
    Settled(RequestId),
    Cleared,
}

enum SettleOutcome {
    Applied,
    Unknown,
    Duplicate,
}

pub struct RequestLedger {
    inner: RwLock<LedgerInner>,
    paused: AtomicBool,
    page_secure: AtomicBool,
    events: broadcast::Sender<LedgerEvent>,
}

struct LedgerInner {
    records: IndexMap<RequestId, RequestRecord>,
    stats: LedgerStats,
}

impl RequestLedger {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: RwLock::new(LedgerInner {
                records: IndexMap::new(),
                stats: LedgerStats::default(),
            }),
            paused: AtomicBool::new(false),
            page_secure: AtomicBool::new(false),
            events,
        }
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Route one bridge message to its handler.
    pub fn apply(&self, message: TapMessage) {
        match message {
            TapMessage::Start(event) => self.apply_start(event),
            TapMessage::Settle(event) => self.apply_settle(event),
        }
    }

    fn apply_start(&self, event: StartEvent) {
        if self.paused.load(Ordering::SeqCst) {
            let mut inner = self.inner.write();
            inner.stats.dropped_while_paused =
                inner.stats.dropped_while_paused.saturating_add(1);
            return;
        }
        let page_was_secure = self.page_secure.load(Ordering::SeqCst);
        let mut inner = self.inner.write();
        if inner.records.contains_key(&event.id) {
            inner.stats.duplicate_starts = inner.stats.duplicate_starts.saturating_add(1);
            debug!(target: "request-ledger", id = %event.id, "duplicate start ignored");
            return;
        }
        let record = RequestRecord::open(event, page_was_secure, Utc::now());
        let id = record.id.clone();
        inner.records.insert(id.clone(), record);
        inner.stats.started = inner.stats.started.saturating_add(1);
        drop(inner);
        let _ = self.events.send(LedgerEvent::Started(id));
    }

    fn apply_settle(&self, event: SettleEvent) {
        let SettleEvent {
            id,
            status,
            status_text,
            headers,
            body_preview,
            error,
        } = event;
        let mut inner = self.inner.write();
        let outcome = match inner.records.get_mut(&id) {
            None => SettleOutcome::Unknown,
            Some(record) if record.is_settled() => SettleOutcome::Duplicate,
            Some(record) => {
                record.status = status;
                record.status_text = status_text;
                record.response_headers = headers;
                record.response_body_preview = body_preview;
                record.error = error;
                record.completed_at = Some(Utc::now());
                SettleOutcome::Applied
            }
        };
        match outcome {
            SettleOutcome::Applied => {
                inner.stats.settled = inner.stats.settled.saturating_add(1);
                drop(inner);
                let _ = self.events.send(LedgerEvent::Settled(id));
            }
            SettleOutcome::Unknown => {
                inner.stats.unknown_settles = inner.stats.unknown_settles.saturating_add(1);
                debug!(target: "request-ledger", id = %id, "settle without start discarded");
            }
            SettleOutcome::Duplicate => {
                inner.stats.duplicate_settles = inner.stats.duplicate_settles.saturating_add(1);
                debug!(target: "request-ledger", id = %id, "repeated settle ignored");
            }
        }
    }

    /// Insertion-ordered clone of every record.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.inner.read().records.values().cloned().collect()
    }

    pub fn get(&self, id: &RequestId) -> Option<RequestRecord> {
        self.inner.read().records.get(id).cloned()
    }

    pub fn counts(&self) -> LedgerCounts {
        let inner = self.inner.read();
        let mut counts = LedgerCounts {
            total: inner.records.len(),
            ..LedgerCounts::default()
        };
        for record in inner.records.values() {
            match record.phase() {
                RequestPhase::Pending => counts.pending += 1,
                RequestPhase::Succeeded => counts.succeeded += 1,
                RequestPhase::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn stats(&self) -> LedgerStats {
        self.inner.read().stats
    }

    /// Drop every record. Full bodies on disk are the store's concern.
    pub fn clear(&self) {
        self.inner.write().records.clear();
        let _ = self.events.send(LedgerEvent::Cleared);
    }

    /// Stop admitting new records. Records already pending still settle;
    /// the gate is checked only when a start arrives.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Record whether the hosting page is currently on a secure origin.
    /// Snapshotted into each record as it opens, so later navigations do
    /// not rewrite history.
    pub fn set_page_secure(&self, secure: bool) {
        self.page_secure.store(secure, Ordering::SeqCst);
    }
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use webtap_core_types::RequestKind;

    fn start(id: &str, url: &str) -> TapMessage {
        TapMessage::Start(StartEvent {
            id: RequestId::from(id),
            method: "GET".to_string(),
            url: url.to_string(),
            kind: RequestKind::Fetch,
            headers: BTreeMap::new(),
            body_preview: None,
            stack_frames: Vec::new(),
        })
    }

    fn settle_ok(id: &str, status: u16) -> TapMessage {
        TapMessage::Settle(SettleEvent {
            id: RequestId::from(id),
            status: Some(status),
            status_text: Some("OK".to_string()),
            headers: BTreeMap::new(),
            body_preview: None,
            error: None,
        })
    }

    fn settle_err(id: &str, reason: &str) -> TapMessage {
        TapMessage::Settle(SettleEvent {
            id: RequestId::from(id),
            status: None,
            status_text: None,
            headers: BTreeMap::new(),
            body_preview: None,
            error: Some(reason.to_string()),
        })
    }

    #[test]
    fn settlement_is_idempotent() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.apply(settle_ok("r1", 200));
        ledger.apply(settle_err("r1", "late failure"));

        let record = ledger.get(&RequestId::from("r1")).expect("record");
        assert_eq!(record.status, Some(200));
        assert!(record.error.is_none());
        assert_eq!(record.phase(), RequestPhase::Succeeded);
        assert_eq!(ledger.stats().duplicate_settles, 1);
    }

    #[test]
    fn unknown_settle_is_discarded() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.apply(settle_ok("ghost", 200));

        assert_eq!(ledger.snapshot().len(), 1);
        assert_eq!(
            ledger.get(&RequestId::from("r1")).expect("record").phase(),
            RequestPhase::Pending
        );
        assert_eq!(ledger.stats().unknown_settles, 1);
    }

    #[test]
    fn duplicate_start_keeps_first_record() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/first"));
        ledger.apply(start("r1", "https://a.test/second"));

        let record = ledger.get(&RequestId::from("r1")).expect("record");
        assert_eq!(record.url, "https://a.test/first");
        assert_eq!(ledger.snapshot().len(), 1);
        assert_eq!(ledger.stats().duplicate_starts, 1);
    }

    #[test]
    fn settles_apply_in_any_cross_request_order() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.apply(start("r2", "https://a.test/two"));
        ledger.apply(settle_ok("r2", 200));
        ledger.apply(settle_ok("r1", 201));

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, RequestId::from("r1"), "insertion order kept");
        assert_eq!(snapshot[0].status, Some(201));
        assert_eq!(snapshot[1].status, Some(200));
        assert!(snapshot.iter().all(RequestRecord::is_settled));
    }

    #[test]
    fn pause_gates_starts_but_not_settles() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.pause();
        ledger.apply(start("r2", "https://a.test/two"));
        ledger.apply(settle_ok("r1", 200));

        assert_eq!(ledger.snapshot().len(), 1);
        assert!(ledger.get(&RequestId::from("r2")).is_none());
        assert_eq!(
            ledger.get(&RequestId::from("r1")).expect("record").status,
            Some(200)
        );
        assert_eq!(ledger.stats().dropped_while_paused, 1);

        ledger.resume();
        ledger.apply(start("r3", "https://a.test/three"));
        assert_eq!(ledger.snapshot().len(), 2);
    }

    #[test]
    fn counts_track_phases() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.apply(start("r2", "https://a.test/two"));
        ledger.apply(start("r3", "https://a.test/three"));
        ledger.apply(settle_ok("r1", 200));
        ledger.apply(settle_err("r2", "connection reset"));

        let counts = ledger.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn error_settle_marks_failed_phase() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.apply(settle_err("r1", "timeout"));

        let record = ledger.get(&RequestId::from("r1")).expect("record");
        assert_eq!(record.phase(), RequestPhase::Failed);
        assert_eq!(record.error.as_deref(), Some("timeout"));
        assert!(record.duration_ms().is_some());
    }

    #[test]
    fn mixed_content_flag_snapshots_page_scheme() {
        let ledger = RequestLedger::new();
        ledger.set_page_secure(true);
        ledger.apply(start("r1", "http://plain.test/pixel"));
        ledger.set_page_secure(false);
        ledger.apply(start("r2", "http://plain.test/pixel"));

        assert!(ledger
            .get(&RequestId::from("r1"))
            .expect("record")
            .is_mixed_content());
        assert!(!ledger
            .get(&RequestId::from("r2"))
            .expect("record")
            .is_mixed_content());
    }

    #[test]
    fn clear_empties_the_ledger() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.clear();
        assert!(ledger.snapshot().is_empty());
        assert_eq!(ledger.counts().total, 0);
    }

    #[test]
    fn lifecycle_events_are_published() {
        let ledger = RequestLedger::new();
        let mut events = ledger.subscribe();
        ledger.apply(start("r1", "https://a.test/one"));
        ledger.apply(settle_ok("r1", 200));
        ledger.clear();

        assert!(matches!(events.try_recv(), Ok(LedgerEvent::Started(_))));
        assert!(matches!(events.try_recv(), Ok(LedgerEvent::Settled(_))));
        assert!(matches!(events.try_recv(), Ok(LedgerEvent::Cleared)));
    }

    #[test]
    fn response_category_derives_from_settle_payload() {
        let ledger = RequestLedger::new();
        ledger.apply(start("r1", "https://a.test/api"));
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        ledger.apply(TapMessage::Settle(SettleEvent {
            id: RequestId::from("r1"),
            status: Some(200),
            status_text: Some("OK".to_string()),
            headers,
            body_preview: Some(r#"{"ok":true}"#.to_string()),
            error: None,
        }));

        let record = ledger.get(&RequestId::from("r1")).expect("record");
        assert_eq!(record.content_category(), ContentCategory::Json);
    }
}
