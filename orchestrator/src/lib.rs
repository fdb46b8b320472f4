//! Artifact network proxy
//!
//! Host-facing mediation layer between sandboxed artifacts and the network.
//! [`NetworkProxy`] sequences the core components (rate limiting, security
//! policy, response cache, domain reputation and HTTP execution) into one
//! pipeline and exposes the management operations the host needs.

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod events;
pub mod logging;
pub mod proxy;
pub mod registry;
pub mod stats;

pub use config::{MonitorConfig, ProxyConfig, ReputationSection};
pub use diagnostics::{ExecutionResult, ReputationSummary, RequestDiagnostics, StageTiming};
pub use events::EventBus;
pub use logging::{init_logging, redact_headers, LoggingConfig, LoggingGuard};
pub use proxy::{NetworkProxy, NetworkProxyBuilder, OverrideGrant};
pub use registry::{ActiveRequest, InFlightGuard, RequestRegistry};
pub use stats::StatsCollector;

pub use proxy_common::{
    EnforcementLevel, HttpMethod, NetworkStats, ProxyError, ProxyEvent, ProxyRequest,
    ProxyResponse, ProxySettings, RequestStatus, SettingsUpdate,
};
pub use proxy_core::{CustomRule, DomainReputationRecord, ReputationLevel, ReputationProvider, RequestExecutor};
