//! Shared types for the artifact network proxy
//!
//! This crate defines the data contracts used across all proxy crates:
//! - Requests and responses exchanged with sandboxed artifacts
//! - Runtime settings and their partial updates
//! - The error taxonomy surfaced to the host
//! - Host notifications and aggregate statistics

pub mod error;
pub mod events;
pub mod settings;
pub mod types;

pub use error::{ErrorInfo, ErrorKind, ErrorSeverity, ProxyError, ProxyResult};
pub use events::{NetworkStats, ProxyEvent};
pub use settings::{
    AdvancedSettings, AdvancedSettingsUpdate, EnforcementLevel, ProxySettings, SettingsUpdate,
};
pub use types::{normalize_domain, HttpMethod, ProxyRequest, ProxyResponse, RequestStatus};
