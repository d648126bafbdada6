//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Resolve the filter from `RUST_LOG`, then config, then the default
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - A bare level in config (`"info"`) applies to this crate and tower-http;
//!   anything else is taken as a full filter directive

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

pub const DEFAULT_FILTER: &str = "edge_router=debug,tower_http=debug";

const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Filter directive for a configured log level.
pub fn filter_directive(log_level: &str) -> String {
    let level = log_level.trim();
    if level.is_empty() {
        DEFAULT_FILTER.to_string()
    } else if LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        let level = level.to_ascii_lowercase();
        format!("edge_router={level},tower_http={level}")
    } else {
        level.to_string()
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.log_level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
