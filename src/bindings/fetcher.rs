//! Service bindings reachable over `fetch`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{Request, Uri};
use axum::response::Response;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

use crate::dispatch::{HandlerError, ServerEntry};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid service url `{0}`")]
    InvalidUrl(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("service handler failed: {0}")]
    Handler(Box<HandlerError>),
}

/// Anything a request can be sent to.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, FetchError>;
}

/// Split an upstream base url into scheme, authority and path prefix.
///
/// Only absolute `http` urls are accepted.
pub(crate) fn parse_upstream(url: &str) -> Result<(Scheme, Authority, String), FetchError> {
    let invalid = || FetchError::InvalidUrl(url.to_string());
    let uri = Uri::from_str(url).map_err(|_| invalid())?;
    let scheme = uri.scheme().cloned().ok_or_else(invalid)?;
    if scheme != Scheme::HTTP {
        return Err(invalid());
    }
    let authority = uri.authority().cloned().ok_or_else(invalid)?;
    Ok((scheme, authority, uri.path().trim_end_matches('/').to_string()))
}

/// Forwards requests to an HTTP upstream, keeping path and query.
#[derive(Clone)]
pub struct HttpFetcher {
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    client: Client<HttpConnector, Body>,
}

impl HttpFetcher {
    /// `url` is the upstream base, e.g. `http://127.0.0.1:9000/api`.
    pub fn new(url: &str) -> Result<Self, FetchError> {
        let (scheme, authority, base_path) = parse_upstream(url)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            scheme,
            authority,
            base_path,
            client,
        })
    }

    fn rewrite(&self, uri: &Uri) -> Result<Uri, FetchError> {
        let path_and_query = uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        let mut parts = uri.clone().into_parts();
        parts.scheme = Some(self.scheme.clone());
        parts.authority = Some(self.authority.clone());
        parts.path_and_query = Some(
            PathAndQuery::from_str(&format!("{}{}", self.base_path, path_and_query))
                .map_err(|e| FetchError::InvalidUrl(e.to_string()))?,
        );
        Uri::from_parts(parts).map_err(|e| FetchError::InvalidUrl(e.to_string()))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, FetchError> {
        let (mut parts, body) = request.into_parts();
        parts.uri = self.rewrite(&parts.uri)?;
        // the client derives Host from the rewritten uri
        parts.headers.remove(axum::http::header::HOST);

        tracing::debug!(upstream = %parts.uri, method = %parts.method, "Forwarding to service binding");
        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| FetchError::Upstream(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("upstream", &format_args!("{}://{}{}", self.scheme, self.authority, self.base_path))
            .finish()
    }
}

/// An in-process handler exposed as a service binding.
#[derive(Clone)]
pub struct EntryFetcher {
    entry: Arc<dyn ServerEntry>,
}

impl EntryFetcher {
    pub fn new(entry: impl ServerEntry + 'static) -> Self {
        Self {
            entry: Arc::new(entry),
        }
    }
}

#[async_trait]
impl Fetcher for EntryFetcher {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, FetchError> {
        self.entry
            .fetch(request)
            .await
            .map_err(|e| FetchError::Handler(Box::new(e)))
    }
}
