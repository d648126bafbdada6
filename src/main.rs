//! Edge router
//!
//! Serves a route tree of lazily loaded modules, giving every request an
//! ambient context with its bindings, cookies and redirect slot.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────────▶ http::server (request id, trace, timeout)
//!                      │
//!                      ▼
//!                  dispatch::Dispatcher
//!                      │   routing::match_routes ──▶ MatchChain
//!                      │   MatchChain::load_modules
//!                      ▼
//!                  context::with_context(RequestContext)
//!                      │   prechecks ─▶ handler / renderer
//!                      │   durable stubs ─▶ nested durable contexts
//!                      ▼
//!     ◀─────────── response (+ Location, + Set-Cookie)
//! ```

mod app;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use edge_router::config::{load_config, parse_config, RouterConfig};
use edge_router::lifecycle::signals::forward_signals;
use edge_router::observability::{logging, metrics};
use edge_router::{Shutdown, Startup};

#[derive(Parser)]
#[command(name = "edge-router")]
#[command(about = "Hierarchical URL-pattern router with per-request context", long_about = None)]
struct Cli {
    /// TOML configuration file. The built-in demo configuration is used
    /// when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config(path),
        None => parse_config(app::DEFAULT_CONFIG),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            logging::init(&RouterConfig::default().observability);
            tracing::error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };
    logging::init(&config.observability);

    tracing::info!("edge-router v{} starting", env!("CARGO_PKG_VERSION"));
    if cli.config.is_none() {
        tracing::warn!("No --config given; serving the demo routes with a development cookie secret");
    }
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        routes = config.routes.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    forward_signals(shutdown.clone());

    Startup::new(config)
        .with_registry(app::registry())
        .with_bindings(app::bindings())
        .with_meta(app::meta())
        .with_renderer(Arc::new(app::shell::HtmlRenderer))
        .serve(shutdown.signalled())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
