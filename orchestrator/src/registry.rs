//! In-flight request registry
//!
//! Every request entering the pipeline registers here and receives an
//! [`InFlightGuard`]. Dropping the guard removes the entry, so a request that
//! fails or panics mid-pipeline never stays "active".

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use proxy_common::{HttpMethod, ProxyError, ProxyRequest, RequestStatus};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct RequestContext {
    artifact_id: String,
    url: String,
    method: HttpMethod,
    status: RequestStatus,
    started_at: DateTime<Utc>,
    started: Instant,
    token: CancellationToken,
}

/// Public view of one in-flight request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRequest {
    pub request_id: String,
    pub artifact_id: String,
    pub url: String,
    pub method: HttpMethod,
    pub status: RequestStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
pub struct RequestRegistry {
    contexts: DashMap<String, RequestContext>,
    reserved: AtomicUsize,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a request if fewer than `limit` are in flight
    pub fn register(
        self: &Arc<Self>,
        request: &ProxyRequest,
        limit: usize,
    ) -> Result<InFlightGuard, ProxyError> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .map_err(|_| ProxyError::ConcurrencyLimit { limit })?;

        let token = CancellationToken::new();
        match self.contexts.entry(request.id.clone()) {
            Entry::Occupied(_) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                Err(ProxyError::validation(
                    "id",
                    &format!("request {} is already in flight", request.id),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(RequestContext {
                    artifact_id: request.artifact_id.clone(),
                    url: request.url.clone(),
                    method: request.method,
                    status: RequestStatus::Pending,
                    started_at: Utc::now(),
                    started: Instant::now(),
                    token: token.clone(),
                });
                Ok(InFlightGuard {
                    registry: Arc::clone(self),
                    request_id: request.id.clone(),
                    token,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn status(&self, request_id: &str) -> Option<RequestStatus> {
        self.contexts.get(request_id).map(|c| c.status)
    }

    /// Mark a request cancelled; false if it is not in flight
    pub fn cancel(&self, request_id: &str) -> bool {
        match self.contexts.get(request_id) {
            Some(context) => {
                context.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ActiveRequest> {
        let mut active: Vec<ActiveRequest> = self
            .contexts
            .iter()
            .map(|entry| {
                let context = entry.value();
                ActiveRequest {
                    request_id: entry.key().clone(),
                    artifact_id: context.artifact_id.clone(),
                    url: context.url.clone(),
                    method: context.method,
                    status: context.status,
                    started_at: context.started_at,
                    elapsed_ms: context.started.elapsed().as_millis() as u64,
                }
            })
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Ids of requests in flight for longer than `max_age`
    pub fn stale(&self, max_age: Duration) -> Vec<String> {
        self.contexts
            .iter()
            .filter(|entry| entry.value().started.elapsed() > max_age)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn set_status(&self, request_id: &str, status: RequestStatus) {
        if let Some(mut context) = self.contexts.get_mut(request_id) {
            context.status = status;
        }
    }

    fn release(&self, request_id: &str) {
        if self.contexts.remove(request_id).is_some() {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Registry membership of one request; removal happens on drop
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<RequestRegistry>,
    request_id: String,
    token: CancellationToken,
}

impl InFlightGuard {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn set_status(&self, status: RequestStatus) {
        self.registry.set_status(&self.request_id, status);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the request is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(&self.request_id);
    }
}
