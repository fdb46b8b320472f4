//! Command line interface of the `artifact-proxy` binary

use clap::{Args as ClapArgs, Parser, Subcommand};
use proxy_common::{EnforcementLevel, HttpMethod, ProxyError, ProxyRequest};
use std::path::PathBuf;

use crate::config::ProxyConfig;

/// Artifact Proxy - mediated network access for sandboxed artifacts
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON formatted logs
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Default per-attempt timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Allow loopback and private network targets
    #[arg(long, global = true)]
    pub allow_private_networks: bool,

    /// Policy enforcement level (strict, moderate, permissive)
    #[arg(long, global = true, value_parser = parse_enforcement_level)]
    pub enforcement_level: Option<EnforcementLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Send one request through the proxy pipeline
    Fetch(FetchArgs),

    /// Print the aggregated reputation of a domain
    CheckDomain {
        domain: String,
    },

    /// Print the effective configuration
    Settings,
}

#[derive(ClapArgs, Debug, Clone, PartialEq)]
pub struct FetchArgs {
    pub url: String,

    /// HTTP method (GET, POST, PUT, DELETE)
    #[arg(long, short = 'X', default_value = "GET", value_parser = parse_method)]
    pub method: HttpMethod,

    /// Artifact identity the request is attributed to
    #[arg(long, default_value = "cli")]
    pub artifact: String,

    /// Request header as `Name: value`; repeatable
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,

    /// Accept overridable policy violations
    #[arg(long)]
    pub approve: bool,

    #[arg(long)]
    pub bypass_cache: bool,
}

impl FetchArgs {
    pub fn to_request(&self) -> ProxyRequest {
        let mut request = ProxyRequest::new(self.artifact.clone(), self.method, self.url.clone());
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        if let Some(data) = &self.data {
            request = request.with_body(data.clone().into_bytes());
        }
        request.pre_approved = self.approve;
        request.bypass_cache = self.bypass_cache;
        request
    }
}

impl Cli {
    /// Load the configuration file (or defaults) and apply flag overrides
    pub fn resolve_config(&self) -> Result<ProxyConfig, ProxyError> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.settings.default_timeout_ms = timeout_ms;
        }
        if self.allow_private_networks {
            config.settings.allow_private_networks = true;
        }
        if let Some(level) = self.enforcement_level {
            config.settings.enforcement_level = level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_enforcement_level(value: &str) -> Result<EnforcementLevel, String> {
    value.parse().map_err(|e: ProxyError| e.to_string())
}

fn parse_method(value: &str) -> Result<HttpMethod, String> {
    value.parse().map_err(|e: ProxyError| e.to_string())
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    let (name, header_value) = value
        .split_once(':')
        .ok_or_else(|| format!("header '{}' must look like 'Name: value'", value))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header '{}' has an empty name", value));
    }
    Ok((name.to_string(), header_value.trim().to_string()))
}
