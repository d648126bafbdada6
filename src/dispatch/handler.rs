//! Contracts implemented by route modules.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::Request;
use axum::response::Response;

use crate::context::RequestContext;
use crate::dispatch::outcome::HandlerError;

/// An imperative request handler, built per request.
#[async_trait]
pub trait ServerEntry: Send + Sync {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, HandlerError>;
}

/// The export of a handler module: declares its bindings and builds a
/// [`ServerEntry`] inside the request's context scope.
pub trait ServerModule: Send + Sync {
    /// Binding names this handler may read from its environment.
    fn dependencies(&self) -> &[&str] {
        &[]
    }

    /// Build the handler. `context` is the restricted view, also reachable
    /// through [`crate::context::current`].
    fn construct(&self, context: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError>;
}

/// Runs before the terminal module, inside the request's context scope.
/// `Ok(None)` continues dispatch, `Ok(Some(response))` short-circuits with
/// that response, and a redirect (returned or recorded on the context)
/// short-circuits with a 3xx.
#[async_trait]
pub trait Precheck: Send + Sync {
    async fn check(&self, request: &Parts) -> Result<Option<Response>, HandlerError>;
}

/// A declarative UI export. Rendering belongs to a [`Renderer`].
pub trait View: Any + Send + Sync {
    fn name(&self) -> &str;
}

/// The collaborator that turns views into responses.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// `views` holds every view module on the matched chain, outermost
    /// layout first; the last one is the page itself.
    async fn render(
        &self,
        request: Request<Body>,
        views: Vec<Arc<dyn View>>,
    ) -> Result<Response, HandlerError>;
}
