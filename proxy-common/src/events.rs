//! Asynchronous notifications pushed to the host application

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::settings::ProxySettings;
use crate::types::RequestStatus;

/// Events for the event-driven host integration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyEvent {
    /// A request moved to a new pipeline state
    RequestStatusChanged {
        request_id: String,
        artifact_id: String,
        status: RequestStatus,
    },

    /// The policy evaluator rejected or flagged a request
    SecurityViolationRaised {
        request_id: String,
        artifact_id: String,
        domain: String,
        violation_type: String,
        description: String,
        can_override: bool,
        requires_approval: bool,
    },

    /// Settings were replaced through `update_settings`
    SettingsChanged { settings: ProxySettings },

    /// An (artifact, domain) window is close to exhaustion
    RateLimitWarning {
        artifact_id: String,
        domain: String,
        remaining: u32,
        limit: u32,
    },
}

/// Aggregate counters reported by `get_stats`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cached_responses: u64,
    pub blocked_requests: u64,
    pub rate_limited_requests: u64,
    pub cancelled_requests: u64,
    pub active_requests: usize,
    /// Cache hits divided by cache lookups, in percent
    pub cache_hit_rate: f64,
    pub average_response_time_ms: f64,
    pub total_bytes_received: u64,
    pub requests_by_method: HashMap<String, u64>,
    pub requests_by_status: HashMap<u16, u64>,
    pub violations_by_type: HashMap<String, u64>,
}

impl NetworkStats {
    /// Success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }
}
