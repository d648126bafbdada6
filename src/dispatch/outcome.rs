//! Redirect targets and the handler error type.
//!
//! # Design Decisions
//! - One redirect mechanism: the context's write-once redirect slot. A
//!   handler records the target there and exits early by returning
//!   `HandlerError::Redirect`, which `?` carries across any number of frames.
//! - Business failures stay inside the handler's own response; anything
//!   that escapes as an error becomes a 500.

use axum::http::StatusCode;
use thiserror::Error;

use crate::bindings::FetchError;
use crate::context::cookie::CookieError;
use crate::context::ContextError;
use crate::durable::StorageError;
use crate::routing::ImportError;

/// Where to navigate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum To {
    /// A full location string, used verbatim.
    Path(String),
    /// A pathname with an optional query string.
    Location {
        pathname: String,
        search: Option<String>,
    },
}

impl To {
    pub fn location(&self) -> String {
        match self {
            To::Path(path) => path.clone(),
            To::Location { pathname, search } => match search.as_deref().map(|s| s.trim_start_matches('?')) {
                Some(search) if !search.is_empty() => format!("{pathname}?{search}"),
                _ => pathname.clone(),
            },
        }
    }
}

impl From<&str> for To {
    fn from(path: &str) -> Self {
        To::Path(path.to_string())
    }
}

impl From<String> for To {
    fn from(path: String) -> Self {
        To::Path(path)
    }
}

/// A pending navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    location: String,
    status: Option<StatusCode>,
}

impl Redirect {
    pub fn to(to: impl Into<To>) -> Self {
        Self {
            location: to.into().location(),
            status: None,
        }
    }

    /// Override the dispatcher's default redirect status. Non-3xx codes
    /// are ignored.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status).filter(StatusCode::is_redirection);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

/// Errors escaping a handler, pre-check, or renderer.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Early exit carrying a redirect.
    #[error("redirect to `{}`", .0.location())]
    Redirect(Redirect),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Cookie(#[from] CookieError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The route configuration cannot be served (e.g. no module matched).
    #[error("route configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, HandlerError::Redirect(_))
    }
}

impl From<Redirect> for HandlerError {
    fn from(redirect: Redirect) -> Self {
        HandlerError::Redirect(redirect)
    }
}
