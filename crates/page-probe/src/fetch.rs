//! Decorator over the page's promise-style request primitive.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use webtap_core_types::RequestKind;

use crate::model::{RawRequest, RawResponse};
use crate::PageProbe;

/// Network-level failure surfaced by a primitive: refused connection,
/// failed DNS lookup, torn socket. Carries the engine's reason string.
#[derive(Clone, Debug, Error)]
#[error("{0}")]
pub struct NetworkFault(pub String);

impl NetworkFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// The promise-style primitive: one call, one settlement.
#[async_trait]
pub trait FetchPrimitive: Send + Sync {
    async fn send(&self, request: RawRequest) -> Result<RawResponse, NetworkFault>;
}

/// Wraps a [`FetchPrimitive`] so every call is observed. Capture completes
/// synchronously before the inner future is awaited, and the inner outcome
/// passes through untouched in either direction.
pub struct InstrumentedFetch<P> {
    inner: P,
    probe: Arc<PageProbe>,
}

impl<P> InstrumentedFetch<P> {
    pub fn new(probe: Arc<PageProbe>, inner: P) -> Self {
        Self { inner, probe }
    }
}

#[async_trait]
impl<P: FetchPrimitive> FetchPrimitive for InstrumentedFetch<P> {
    async fn send(&self, request: RawRequest) -> Result<RawResponse, NetworkFault> {
        let ticket = self.probe.capture_start(RequestKind::Fetch, &request);
        let result = self.inner.send(request).await;
        match &result {
            Ok(response) => self.probe.settle_success(&ticket, response),
            Err(fault) => self.probe.settle_error(&ticket, &fault.0),
        }
        result
    }
}
