//! Pending AuthnRequest correlation.
//!
//! Maps the client-visible RelayState to the ID of the AuthnRequest it was
//! issued with. An entry is consumed by exactly one `take`; expired entries
//! behave as if they were never stored.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio_util::sync::CancellationToken;

use super::SsoError;

/// An issued AuthnRequest awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request_id: String,
    pub created_at: Instant,
}

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Record `state -> request_id`. Fails if `state` is already pending.
    async fn insert(&self, state: &str, request_id: &str) -> Result<(), SsoError>;

    /// Atomically remove and return the pending request for `state`.
    ///
    /// Returns `None` for unknown, already consumed, or expired states.
    async fn take(&self, state: &str) -> Result<Option<PendingRequest>, SsoError>;

    /// Drop expired entries, returning how many were removed.
    async fn cleanup(&self) -> usize;
}

pub type SharedCorrelationStore = Arc<dyn CorrelationStore>;

/// Single-node correlation store.
pub struct MemoryCorrelationStore {
    pending: DashMap<String, PendingRequest>,
    ttl: Duration,
}

impl MemoryCorrelationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn is_expired(&self, request: &PendingRequest) -> bool {
        request.created_at.elapsed() > self.ttl
    }
}

#[async_trait]
impl CorrelationStore for MemoryCorrelationStore {
    async fn insert(&self, state: &str, request_id: &str) -> Result<(), SsoError> {
        match self.pending.entry(state.to_string()) {
            Entry::Occupied(_) => Err(SsoError::Internal(
                "RelayState is already pending".to_string(),
            )),
            Entry::Vacant(slot) => {
                slot.insert(PendingRequest {
                    request_id: request_id.to_string(),
                    created_at: Instant::now(),
                });
                Ok(())
            }
        }
    }

    async fn take(&self, state: &str) -> Result<Option<PendingRequest>, SsoError> {
        let Some((_, request)) = self.pending.remove(state) else {
            return Ok(None);
        };
        if self.is_expired(&request) {
            tracing::debug!(request_id = %request.request_id, "Pending SAML request expired");
            return Ok(None);
        }
        Ok(Some(request))
    }

    async fn cleanup(&self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, request| !self.is_expired(request));
        before.saturating_sub(self.pending.len())
    }
}

/// Periodically remove expired pending requests until `shutdown` fires.
pub async fn start_correlation_sweeper(
    store: SharedCorrelationStore,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::debug!(
        interval_secs = interval.as_secs(),
        "Starting SAML pending request sweeper"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                let removed = store.cleanup().await;
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired SAML pending requests");
                }
            }
        }
    }

    tracing::debug!("SAML pending request sweeper stopped");
}
