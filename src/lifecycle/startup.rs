//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn configured bindings into an `Environment`
//! - Check every declared binding dependency is bound
//! - Build the route tree, dispatcher and HTTP server
//! - Bind the listener and serve
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::bindings::{BindingsMeta, FetchError, HttpFetcher};
use crate::config::{BindingConfig, ConfigError, RouterConfig};
use crate::context::{Binding, Environment};
use crate::dispatch::{Dispatcher, Renderer};
use crate::http::HttpServer;
use crate::routing::{ModuleRegistry, RouteTree};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("binding `{name}`: {source}")]
    Binding {
        name: String,
        #[source]
        source: FetchError,
    },

    #[error("bindings are declared but not bound: {}", .0.join(", "))]
    MissingBindings(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Add the configured bindings to `base`. Configured names replace
/// bindings already present in `base`.
pub fn build_environment(
    configured: &BTreeMap<String, BindingConfig>,
    base: Environment,
) -> Result<Environment, StartupError> {
    let mut env = base;
    for (name, binding) in configured {
        if env.contains(name) {
            tracing::warn!(binding = %name, "Configured binding replaces a built-in one");
        }
        let binding = match binding {
            BindingConfig::Var { value } => Binding::var(value.clone()),
            BindingConfig::Service { url } => {
                let fetcher = HttpFetcher::new(url).map_err(|source| StartupError::Binding {
                    name: name.clone(),
                    source,
                })?;
                Binding::service(fetcher)
            }
        };
        env = env.with(name.clone(), binding);
    }
    Ok(env)
}

/// Assembles a server from configuration plus the application's modules
/// and built-in bindings.
pub struct Startup {
    config: RouterConfig,
    registry: ModuleRegistry,
    bindings: Environment,
    meta: BindingsMeta,
    renderer: Option<Arc<dyn Renderer>>,
}

impl Startup {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            registry: ModuleRegistry::new(),
            bindings: Environment::new(),
            meta: BindingsMeta::new(),
            renderer: None,
        }
    }

    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Bindings that cannot be expressed in config, e.g. durable namespaces.
    pub fn with_bindings(mut self, bindings: Environment) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn with_meta(mut self, meta: BindingsMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Build the server without binding a listener.
    pub fn build(self) -> Result<HttpServer, StartupError> {
        let env = build_environment(&self.config.bindings, self.bindings)?;

        let missing: Vec<String> = self.meta.missing_in(&env).into_iter().collect();
        if !missing.is_empty() {
            return Err(StartupError::MissingBindings(missing));
        }
        if !self
            .config
            .dispatch
            .cookie_secret_keys
            .iter()
            .any(|name| env.var(name).is_ok())
        {
            tracing::warn!(
                keys = ?self.config.dispatch.cookie_secret_keys,
                "No cookie secret is bound; signed cookies cannot be set"
            );
        }

        let tree = RouteTree::from_config(&self.config.routes, &self.registry)?;
        tracing::info!(
            routes = tree.roots().len(),
            bindings = env.len(),
            "Route tree built"
        );

        let mut dispatcher = Dispatcher::new(Arc::new(tree), &self.config.dispatch);
        if let Some(renderer) = self.renderer {
            dispatcher = dispatcher.with_renderer(renderer);
        }

        Ok(HttpServer::new(Arc::new(dispatcher), env, &self.config.timeouts))
    }

    /// Bind the configured address and serve until `shutdown` completes.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind_address = self.config.listener.bind_address.clone();
        let server = self.build()?;

        let listener = TcpListener::bind(&bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Listening for connections");

        server.run(listener, shutdown).await?;
        Ok(())
    }
}
