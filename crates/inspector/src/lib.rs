//! Host-side hub of the observer.
//!
//! [`NetworkInspector::spawn`] assembles the whole pipeline: it opens the
//! body store, creates the ledger, builds the bridge and runs the pump
//! task that drains bridge messages into the ledger. Presentation and
//! export collaborators read through the inspector; pages get their probes
//! wired through it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use body_store::{BodyStore, StoreError};
use page_probe::{PageContext, PageProbe, ProbeInstaller, StackSource};
use probe_bridge::{BridgeError, BridgeHandle};
use request_ledger::{LedgerCounts, LedgerEvent, LedgerStats, RequestLedger, RequestRecord};
use webtap_core_types::{BodyDirection, BodySink, RequestId};

pub use body_store::StoreConfig;
pub use page_probe::ProbeConfig;

#[derive(Debug, Error)]
pub enum InspectorError {
    #[error("body store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InspectorConfig {
    pub store: StoreConfig,
    pub probe: ProbeConfig,
}

impl InspectorConfig {
    pub fn new(store_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(store_root),
            probe: ProbeConfig::default(),
        }
    }
}

/// Everything a replay or copy-out consumer needs to reissue a request.
/// The body is the stored full payload when the disk tier has it, the
/// preview otherwise.
#[derive(Clone, Debug, Serialize)]
pub struct RequestBundle {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

pub struct NetworkInspector {
    ledger: Arc<RequestLedger>,
    store: Arc<BodyStore>,
    bridge: BridgeHandle,
    probe_config: ProbeConfig,
    preserve_bodies: bool,
    pump: JoinHandle<()>,
}

impl NetworkInspector {
    /// Builds the pipeline and starts the pump. Must run inside a tokio
    /// runtime. The returned handle is the emit side of the bridge for
    /// hosts that deliver probe payloads themselves.
    pub fn spawn(config: InspectorConfig) -> Result<(Arc<Self>, BridgeHandle), InspectorError> {
        let preserve_bodies = config.store.preserve_across_sessions;
        let store = BodyStore::open(config.store)?;
        let ledger = Arc::new(RequestLedger::new());
        let (bridge, mut receiver) = probe_bridge::channel();

        let ledger_for_pump = Arc::clone(&ledger);
        let pump = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                ledger_for_pump.apply(message);
            }
            debug!(target: "inspector", "bridge closed, pump finished");
        });

        let inspector = Arc::new(Self {
            ledger,
            store,
            bridge: bridge.clone(),
            probe_config: config.probe,
            preserve_bodies,
            pump,
        });
        Ok((inspector, bridge))
    }

    /// Installs a probe for one page load, wired to this inspector's
    /// bridge and body sink. Re-wiring through the same installer returns
    /// the already installed probe.
    pub fn wire(
        &self,
        installer: &ProbeInstaller,
        context: PageContext,
        stack: Arc<dyn StackSource>,
    ) -> Arc<PageProbe> {
        installer.install(
            context,
            self.bridge.clone(),
            stack,
            Some(self.body_sink()),
            self.probe_config.clone(),
        )
    }

    /// The store viewed as a sink, for callers wiring probes by hand.
    pub fn body_sink(&self) -> Arc<dyn BodySink> {
        Arc::clone(&self.store) as Arc<dyn BodySink>
    }

    /// Decode one raw JSON payload from a script boundary and feed it
    /// into the pipeline.
    pub fn ingest_raw(&self, payload: &str) -> Result<(), BridgeError> {
        self.bridge.emit(probe_bridge::decode_message(payload)?);
        Ok(())
    }

    /// Insertion-ordered snapshot of every observed request.
    pub fn records(&self) -> Vec<RequestRecord> {
        self.ledger.snapshot()
    }

    pub fn record(&self, id: &RequestId) -> Option<RequestRecord> {
        self.ledger.get(id)
    }

    pub fn counts(&self) -> LedgerCounts {
        self.ledger.counts()
    }

    pub fn stats(&self) -> LedgerStats {
        self.ledger.stats()
    }

    /// Live lifecycle subscription; lossy for slow consumers.
    pub fn events(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    /// Full stored body when the disk tier has it, the record's preview
    /// otherwise, `None` when neither exists.
    pub fn body_or_preview(&self, id: &RequestId, direction: BodyDirection) -> Option<String> {
        if let Some(full) = self.store.load(id, direction) {
            return Some(full);
        }
        let record = self.ledger.get(id)?;
        match direction {
            BodyDirection::Request => record.request_body_preview,
            BodyDirection::Response => record.response_body_preview,
        }
    }

    /// Assembles the outgoing side of a request for export.
    pub fn export_request(&self, id: &RequestId) -> Option<RequestBundle> {
        let record = self.ledger.get(id)?;
        let body = self
            .store
            .load(id, BodyDirection::Request)
            .or(record.request_body_preview);
        Some(RequestBundle {
            method: record.method,
            url: record.url,
            headers: record.request_headers,
            body,
        })
    }

    pub fn pause(&self) {
        self.ledger.pause();
    }

    pub fn resume(&self) {
        self.ledger.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.ledger.is_paused()
    }

    /// Forwarded to the ledger; records snapshot this flag as they open.
    pub fn set_page_secure(&self, secure: bool) {
        self.ledger.set_page_secure(secure);
    }

    /// Drops every record, and the stored bodies with them unless the
    /// preserve flag was set at open.
    pub fn clear(&self) {
        self.ledger.clear();
        if !self.preserve_bodies {
            self.store.clear_all();
        }
    }

    /// Waits for queued body writes to reach disk.
    pub fn flush(&self) -> Result<(), InspectorError> {
        Ok(self.store.flush()?)
    }
}

impl Drop for NetworkInspector {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
