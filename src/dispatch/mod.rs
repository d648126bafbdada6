//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! Request
//!     → match_routes (no match → 404, no context scope)
//!     → MatchChain::load_modules (concurrent, memoized for `cache` nodes)
//!     → cookies built from the Cookie header + configured secrets
//!     → with_context(RequestContext)
//!         → prechecks, root to leaf
//!         → terminal module:
//!             Handler → restrict env → construct → fetch
//!             View    → Renderer
//!     → pending redirect / HandlerError::Redirect → 3xx + Location
//!     → other errors and panics → 500
//!     → Set-Cookie for every cookie mutation
//! ```

pub mod handler;
pub mod outcome;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{COOKIE, HOST};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use futures_util::FutureExt;
use url::Url;

use crate::config::DispatchConfig;
use crate::context::{self, BaseContext, CookieHandler, Environment, RequestContext};
use crate::http::{response, RequestIdExt};
use crate::observability::metrics;
use crate::routing::{match_routes, LoadedModule, MatchChain, ModuleKind, PatternCache, RouteTree};

pub use self::handler::{Precheck, Renderer, ServerEntry, ServerModule, View};
pub use self::outcome::{HandlerError, Redirect, To};

/// How a request ended, used for metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    BadRequest,
    NotFound,
    Handled,
    Redirect,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::BadRequest => "bad_request",
            Outcome::NotFound => "not_found",
            Outcome::Handled => "handled",
            Outcome::Redirect => "redirect",
            Outcome::Error => "error",
        }
    }
}

/// Routes requests through a route tree. Cheap to share behind `Arc`;
/// several dispatchers can coexist in one process.
pub struct Dispatcher {
    tree: Arc<RouteTree>,
    patterns: PatternCache,
    cookie_secret_keys: Vec<String>,
    redirect_status: StatusCode,
    renderer: Option<Arc<dyn Renderer>>,
}

impl Dispatcher {
    pub fn new(tree: Arc<RouteTree>, config: &DispatchConfig) -> Self {
        let redirect_status = StatusCode::from_u16(config.redirect_status)
            .ok()
            .filter(StatusCode::is_redirection)
            .unwrap_or(StatusCode::FOUND);

        Self {
            tree,
            patterns: PatternCache::new(),
            cookie_secret_keys: config.cookie_secret_keys.clone(),
            redirect_status,
            renderer: None,
        }
    }

    /// Set the collaborator that renders view routes.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn tree(&self) -> &RouteTree {
        &self.tree
    }

    /// Run only the matcher.
    pub fn match_url(&self, url: &Url) -> Option<MatchChain<'_>> {
        match_routes(&self.tree, url, &self.patterns)
    }

    /// Dispatch one request. Never fails: every failure maps to a status.
    pub async fn handle(&self, request: Request<Body>, base: BaseContext) -> Response {
        let start = Instant::now();
        let request_id = request.request_id().unwrap_or("-").to_string();

        let url = match request_url(&request) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(request_id = %request_id, uri = %request.uri(), error = %e, "Cannot build request URL");
                return finish(Outcome::BadRequest, response::bad_request(), start);
            }
        };

        let Some(chain) = self.match_url(&url) else {
            tracing::debug!(request_id = %request_id, path = %url.path(), "No route matched");
            return finish(Outcome::NotFound, response::not_found(), start);
        };
        let route = chain.labels().join(" > ");
        tracing::debug!(request_id = %request_id, path = %url.path(), route = %route, "Route matched");

        let modules = match chain.load_modules().await {
            Ok(modules) => modules,
            Err(e) => {
                tracing::error!(request_id = %request_id, route = %route, error = %e, "Failed to load route modules");
                return finish(Outcome::Error, response::internal_error(), start);
            }
        };

        let (cookies, cookie_handler) = match base.cookies {
            Some(cookies) => (cookies, None),
            None => {
                let header = request.headers().get(COOKIE).and_then(|v| v.to_str().ok());
                let handler = CookieHandler::new(header, &self.cookie_secrets(&base.bindings));
                (handler.cookies(), Some(handler))
            }
        };

        let ctx = RequestContext::new(base.bindings, Some(cookies), base.wait_until);
        let result = AssertUnwindSafe(context::with_context(ctx.clone(), self.run(request, &modules, &ctx)))
            .catch_unwind()
            .await;

        let (outcome, response) = match result {
            Err(panic) => {
                tracing::error!(request_id = %request_id, route = %route, panic = panic_message(&*panic), "Request handler panicked");
                (Outcome::Error, response::internal_error())
            }
            Ok(Err(HandlerError::Redirect(redirect))) => {
                let redirect = ctx.pending_redirect().unwrap_or(&redirect);
                (Outcome::Redirect, self.redirect_response(redirect))
            }
            Ok(Err(e)) => {
                tracing::error!(request_id = %request_id, route = %route, error = %e, "Request handler failed");
                (Outcome::Error, response::internal_error())
            }
            Ok(Ok(response)) => match ctx.pending_redirect() {
                Some(redirect) => (Outcome::Redirect, self.redirect_response(redirect)),
                None => (Outcome::Handled, response),
            },
        };

        let response = match cookie_handler {
            Some(handler) => handler.send(response),
            None => response,
        };
        tracing::debug!(
            request_id = %request_id,
            route = %route,
            outcome = outcome.as_str(),
            status = response.status().as_u16(),
            "Request dispatched"
        );
        finish(outcome, response, start)
    }

    async fn run(
        &self,
        request: Request<Body>,
        modules: &[LoadedModule<'_>],
        ctx: &RequestContext,
    ) -> Result<Response, HandlerError> {
        let (parts, body) = request.into_parts();
        for loaded in modules {
            let Some(precheck) = loaded.module.precheck() else {
                continue;
            };
            if let Some(response) = precheck.check(&parts).await? {
                return Ok(response);
            }
            if let Some(redirect) = ctx.pending_redirect() {
                return Err(HandlerError::Redirect(redirect.clone()));
            }
        }
        let request = Request::from_parts(parts, body);

        let terminal = modules
            .last()
            .ok_or_else(|| HandlerError::Config("matched route has no module".to_string()))?;

        match terminal.module.kind() {
            ModuleKind::Handler(module) => {
                let scoped = ctx.restrict(module.dependencies())?;
                let entry = context::with_context_sync(scoped.clone(), || module.construct(&scoped))?;
                context::with_context(scoped, entry.fetch(request)).await
            }
            ModuleKind::View(_) => {
                let renderer = self.renderer.as_ref().ok_or_else(|| {
                    HandlerError::Config(format!(
                        "route `{}` is a view but no renderer is configured",
                        terminal.node.label()
                    ))
                })?;
                let views = modules
                    .iter()
                    .filter_map(|loaded| match loaded.module.kind() {
                        ModuleKind::View(view) => Some(view.clone()),
                        ModuleKind::Handler(_) => None,
                    })
                    .collect();
                renderer.render(request, views).await
            }
        }
    }

    fn redirect_response(&self, redirect: &Redirect) -> Response {
        response::redirect(
            redirect.location(),
            redirect.status().unwrap_or(self.redirect_status),
        )
    }

    /// Secrets from the configured `var` bindings, in configured order.
    fn cookie_secrets(&self, bindings: &Environment) -> Vec<String> {
        self.cookie_secret_keys
            .iter()
            .filter_map(|name| bindings.var(name).ok().map(str::to_string))
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

fn finish(outcome: Outcome, response: Response, start: Instant) -> Response {
    metrics::record_dispatch(outcome.as_str(), response.status().as_u16(), start);
    response
}

/// The absolute URL of a request. Origin-form targets take their authority
/// from the `Host` header.
pub fn request_url<B>(request: &Request<B>) -> Result<Url, url::ParseError> {
    let uri = request.uri();
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string());
    }

    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    Url::parse(&format!("http://{host}{path_and_query}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_from_host_header() {
        let request = Request::builder()
            .uri("/profile?tab=1")
            .header(HOST, "app.example.com:8080")
            .body(())
            .unwrap();
        let url = request_url(&request).unwrap();
        assert_eq!(url.as_str(), "http://app.example.com:8080/profile?tab=1");
    }

    #[test]
    fn test_request_url_absolute_form() {
        let request = Request::builder()
            .uri("https://secure.example.com/login")
            .body(())
            .unwrap();
        assert_eq!(request_url(&request).unwrap().as_str(), "https://secure.example.com/login");
    }

    #[test]
    fn test_request_url_rejects_bad_host() {
        let request = Request::builder()
            .uri("/")
            .header(HOST, "bad host")
            .body(())
            .unwrap();
        assert!(request_url(&request).is_err());
    }

    #[test]
    fn test_invalid_redirect_status_falls_back() {
        let config = DispatchConfig {
            redirect_status: 200,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(RouteTree::default()), &config);
        assert_eq!(dispatcher.redirect_status, StatusCode::FOUND);
    }
}
