//! Hierarchical URL-pattern router with an ambient per-request context.

pub mod bindings;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod durable;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::RouterConfig;
pub use context::{with_context, BaseContext, Environment, RequestContext};
pub use dispatch::{Dispatcher, HandlerError, Redirect};
pub use http::HttpServer;
pub use lifecycle::{Shutdown, Startup};
pub use routing::{RouteNode, RouteTree};
