//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::routing::PatternInit;

/// Root configuration for the router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Dispatcher settings (cookie secrets, redirect status).
    pub dispatch: DispatchConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Environment bindings by name.
    pub bindings: BTreeMap<String, BindingConfig>,

    /// The route tree.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Names of the `var` bindings holding cookie signing secrets. The first
    /// bound one signs; all of them verify.
    pub cookie_secret_keys: Vec<String>,

    /// Status used for redirects that do not carry their own.
    pub redirect_status: u16,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cookie_secret_keys: vec!["COOKIE_SECRET".to_string()],
            redirect_status: 302,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// A configured environment binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BindingConfig {
    /// A plain string value.
    Var { value: String },
    /// An HTTP service reached through a fetcher.
    Service { url: String },
}

/// One node of the route tree.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Stable identifier for logging.
    pub id: Option<String>,

    /// Matches when the parent's path is matched exactly. Never has children.
    pub index: bool,

    /// Name of the module in the module registry.
    pub module: Option<String>,

    /// Reuse the loaded module across requests.
    pub cache: bool,

    /// Full pattern fragment.
    pub pattern: Option<PatternInit>,

    /// Shorthand for `pattern.pathname`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub children: Vec<RouteConfig>,
}

impl RouteConfig {
    /// The node's own pattern, merging the `path` shorthand in.
    pub fn effective_pattern(&self) -> Option<PatternInit> {
        match (&self.pattern, &self.path) {
            (Some(pattern), Some(path)) if pattern.pathname.is_none() => Some(PatternInit {
                pathname: Some(path.clone()),
                ..pattern.clone()
            }),
            (Some(pattern), _) => Some(pattern.clone()),
            (None, Some(path)) => Some(PatternInit::pathname(path.clone())),
            (None, None) => None,
        }
    }

    /// Human readable name for diagnostics.
    pub fn label(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        match self.effective_pattern().and_then(|p| p.pathname) {
            Some(pathname) => pathname,
            None if self.index => "<index>".to_string(),
            None => self
                .module
                .clone()
                .unwrap_or_else(|| "<group>".to_string()),
        }
    }
}
