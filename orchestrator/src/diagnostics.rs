//! Per-request pipeline diagnostics

use proxy_common::{ErrorInfo, ProxyResponse, RequestStatus};
use proxy_core::{DomainReputationRecord, ReputationLevel, SecurityViolation};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// When a request entered a pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub status: RequestStatus,
    /// Milliseconds since the request entered the pipeline
    pub at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationSummary {
    pub level: ReputationLevel,
    pub confidence: u8,
    pub from_cache: bool,
    pub sources: usize,
}

impl From<&DomainReputationRecord> for ReputationSummary {
    fn from(record: &DomainReputationRecord) -> Self {
        Self {
            level: record.level,
            confidence: record.confidence,
            from_cache: record.from_cache,
            sources: record.sources.len(),
        }
    }
}

/// What happened to one request on its way through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDiagnostics {
    pub request_id: String,
    pub artifact_id: String,
    pub stages: Vec<StageTiming>,
    /// Execution attempts made, including the first
    pub attempts: u32,
    /// Errors of attempts that were retried
    pub retried_errors: Vec<String>,
    pub cache_hit: bool,
    /// Response was written to the cache
    pub cached: bool,
    pub rate_limit_remaining: Option<u32>,
    pub reputation: Option<ReputationSummary>,
    pub violations: Vec<SecurityViolation>,
    pub warnings: Vec<String>,
    /// Soft violations were accepted because the caller pre-approved
    pub approval_applied: bool,
    pub total_time_ms: u64,
    #[serde(skip)]
    started: Option<Instant>,
}

impl RequestDiagnostics {
    pub fn new(request_id: &str, artifact_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            artifact_id: artifact_id.to_string(),
            stages: Vec::new(),
            attempts: 0,
            retried_errors: Vec::new(),
            cache_hit: false,
            cached: false,
            rate_limit_remaining: None,
            reputation: None,
            violations: Vec::new(),
            warnings: Vec::new(),
            approval_applied: false,
            total_time_ms: 0,
            started: Some(Instant::now()),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or_default()
    }

    pub fn enter(&mut self, status: RequestStatus) {
        let at_ms = self.elapsed_ms();
        self.stages.push(StageTiming { status, at_ms });
    }

    pub fn finish(&mut self) {
        self.total_time_ms = self.elapsed_ms();
    }

    pub fn final_status(&self) -> Option<RequestStatus> {
        self.stages.last().map(|s| s.status)
    }

    pub fn visited(&self, status: RequestStatus) -> bool {
        self.stages.iter().any(|s| s.status == status)
    }
}

/// Boundary result of `execute_request`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub response: Option<ProxyResponse>,
    pub error: Option<ErrorInfo>,
    pub diagnostics: RequestDiagnostics,
}

impl ExecutionResult {
    pub fn completed(response: ProxyResponse, diagnostics: RequestDiagnostics) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
            diagnostics,
        }
    }

    pub fn failed(error: ErrorInfo, diagnostics: RequestDiagnostics) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error),
            diagnostics,
        }
    }
}
