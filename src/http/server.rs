//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with a single fallback handler
//! - Wire up middleware (request ID, tracing, timeout)
//! - Hand every request to the Dispatcher with a fresh base context
//! - Drain background work after graceful shutdown

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, extract::State, http::Request, response::Response, Router};
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::TimeoutConfig;
use crate::context::{BaseContext, Environment, WaitUntil};
use crate::dispatch::Dispatcher;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub bindings: Environment,
    pub wait_until: WaitUntil,
}

/// HTTP server in front of a [`Dispatcher`].
pub struct HttpServer {
    router: Router,
    wait_until: WaitUntil,
}

impl HttpServer {
    pub fn new(dispatcher: Arc<Dispatcher>, bindings: Environment, timeouts: &TimeoutConfig) -> Self {
        let wait_until = WaitUntil::new();
        let state = AppState {
            dispatcher,
            bindings,
            wait_until: wait_until.clone(),
        };
        Self {
            router: Self::build_router(timeouts, state),
            wait_until,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(timeouts: &TimeoutConfig, state: AppState) -> Router {
        Router::new()
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// The router, for driving requests without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Background work registered by handlers.
    pub fn wait_until(&self) -> WaitUntil {
        self.wait_until.clone()
    }

    /// Serve until `shutdown` completes, then wait for in-flight requests
    /// and background tasks.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        let pending = self.wait_until.pending();
        if pending > 0 {
            tracing::info!(pending, "Draining background tasks");
        }
        self.wait_until.drain().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let base = BaseContext::new(state.bindings.clone(), state.wait_until.clone());
    state.dispatcher.handle(request, base).await
}
