//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use edge_router::config::DispatchConfig;
use edge_router::context::{self, Binding, Environment, RequestContext};
use edge_router::dispatch::{Precheck, Renderer, ServerEntry, ServerModule, View};
use edge_router::durable::{DurableNamespace, DurableObject, DurableState};
use edge_router::routing::{importer, ImportError, RouteModule};
use edge_router::{Dispatcher, HandlerError, RouteNode, RouteTree};

pub const SECRET: &str = "integration-test-secret";
pub const USER_COOKIE: &str = "userId";

/// Counts how often each terminal handler ran.
#[derive(Clone, Default)]
pub struct Calls {
    profile: Arc<AtomicUsize>,
    login: Arc<AtomicUsize>,
}

impl Calls {
    pub fn profile(&self) -> usize {
        self.profile.load(Ordering::SeqCst)
    }

    pub fn login(&self) -> usize {
        self.login.load(Ordering::SeqCst)
    }
}

/// The root layout: a view that is never terminal in these tests.
pub struct Shell;

impl View for Shell {
    fn name(&self) -> &str {
        "shell"
    }
}

pub struct AboutPage;

impl View for AboutPage {
    fn name(&self) -> &str {
        "about"
    }
}

/// Lists view names, outermost first.
pub struct NameRenderer;

#[async_trait]
impl Renderer for NameRenderer {
    async fn render(&self, _request: Request<Body>, views: Vec<Arc<dyn View>>) -> Result<Response, HandlerError> {
        let names: Vec<&str> = views.iter().map(|v| v.name()).collect();
        Ok(names.join(">").into_response())
    }
}

/// Redirects to `/` unless the signed user cookie is present.
pub struct RequireUser;

#[async_trait]
impl Precheck for RequireUser {
    async fn check(&self, _request: &Parts) -> Result<Option<Response>, HandlerError> {
        if context::cookies()?.get_signed(USER_COOKIE).is_none() {
            return Err(context::redirect("/"));
        }
        Ok(None)
    }
}

/// A module built from a closure over the request.
pub struct FnModule<F> {
    deps: &'static [&'static str],
    body: Arc<F>,
}

impl<F, Fut> FnModule<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    pub fn new(body: F) -> Self {
        Self {
            deps: &[],
            body: Arc::new(body),
        }
    }

    pub fn with_deps(mut self, deps: &'static [&'static str]) -> Self {
        self.deps = deps;
        self
    }
}

struct FnEntry<F> {
    body: Arc<F>,
}

impl<F, Fut> ServerModule for FnModule<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn dependencies(&self) -> &[&str] {
        self.deps
    }

    fn construct(&self, _ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        Ok(Box::new(FnEntry { body: self.body.clone() }))
    }
}

#[async_trait]
impl<F, Fut> ServerEntry for FnEntry<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    async fn fetch(&self, request: Request<Body>) -> Result<Response, HandlerError> {
        (self.body)(request).await
    }
}

/// Remembers the context it was built with and compares it with the
/// ambient one at request time.
pub struct ExplicitContext;

struct ExplicitEntry {
    built_with: RequestContext,
}

impl ServerModule for ExplicitContext {
    fn construct(&self, ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        Ok(Box::new(ExplicitEntry {
            built_with: ctx.clone(),
        }))
    }
}

#[async_trait]
impl ServerEntry for ExplicitEntry {
    async fn fetch(&self, _request: Request<Body>) -> Result<Response, HandlerError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let ambient = context::current()?;
        let name = ambient.cookies()?.get("name").unwrap_or_default();
        let same = ambient.same_request(&self.built_with);
        Ok(format!("{name}:{same}").into_response())
    }
}

/// A durable counter with no dependencies.
pub struct Counter {
    state: DurableState,
}

#[async_trait]
impl DurableObject for Counter {}

impl Counter {
    pub async fn increment(&self) -> Result<u64, HandlerError> {
        let storage = self.state.storage();
        let next = storage.get_as::<u64>("count").await?.unwrap_or(0) + 1;
        storage.put_as("count", &next).await?;
        Ok(next)
    }
}

pub fn counters() -> DurableNamespace<Counter> {
    DurableNamespace::new("COUNTER", Vec::<String>::new(), |state, _env| async move {
        Ok(Counter { state })
    })
}

pub fn bindings() -> Environment {
    Environment::new()
        .with("COOKIE_SECRET", Binding::var(SECRET))
        .with("COUNTER", Binding::durable(counters()))
}

/// The tree used by most tests:
///
/// ```text
/// root (shell view)
/// ├── index          login handler
/// ├── /profile       profile handler, guarded by RequireUser
/// ├── /about         about view
/// ├── /boom          handler that fails
/// ├── /count         durable counter, with a waitUntil task
/// ├── /whoami        explicit vs ambient context
/// ├── /twice         records a redirect, then propagates a second one
/// ├── /settle        records a redirect, ignores a failed second one
/// ├── /panic         sets a cookie, then panics
/// └── /broken        importer that fails
/// ```
pub fn tree(calls: &Calls) -> RouteTree {
    let login_calls = calls.login.clone();
    let login = FnModule::new(move |request: Request<Body>| {
        let calls = login_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if request.method() == Method::POST {
                context::cookies()?.set_signed(USER_COOKIE, "123")?;
                return Err(context::redirect("/profile"));
            }
            Ok::<Response, HandlerError>("index".into_response())
        }
    });

    let profile_calls = calls.profile.clone();
    let profile = FnModule::new(move |_request: Request<Body>| {
        let calls = profile_calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let user = context::cookies()?.get_signed(USER_COOKIE).unwrap_or_default();
            Ok::<Response, HandlerError>(format!("profile:{user}").into_response())
        }
    });

    let boom = FnModule::new(|_request: Request<Body>| async move {
        Err::<Response, _>(HandlerError::failed("boom"))
    });

    let count = FnModule::new(|_request: Request<Body>| async move {
        let env = context::env()?;
        let counters = env.durable::<Counter>("COUNTER")?;
        let stub = counters.get(&counters.id_from_name("global"));
        let value = stub.call(|counter| async move { counter.increment().await }).await?;

        context::wait_until(async move {
            let ctx = context::current().expect("background work sees its request");
            let _ = ctx.env().durable::<Counter>("COUNTER").expect("counter binding");
        })?;
        Ok::<Response, HandlerError>(value.to_string().into_response())
    })
    .with_deps(&["COUNTER"]);

    let twice = FnModule::new(|_request: Request<Body>| async move {
        let _ = context::redirect("/first");
        Err::<Response, _>(context::redirect("/second"))
    });

    let settle = FnModule::new(|_request: Request<Body>| async move {
        let _ = context::redirect("/first");
        let second = context::current()?.set_redirect("/second");
        assert!(second.is_err());
        Ok::<Response, HandlerError>("ignored".into_response())
    });

    let panics = FnModule::new(|_request: Request<Body>| async move {
        context::cookies()?.set("seen", "yes");
        if context::current().is_ok() {
            panic!("handler bug");
        }
        Ok::<Response, HandlerError>("unreachable".into_response())
    });

    let broken = importer(|| async { Err::<RouteModule, _>(ImportError::new("missing chunk")) });

    RouteTree::new([RouteNode::new()
        .with_id("root")
        .with_module(RouteModule::view(Shell))
        .with_children([
            RouteNode::index()
                .with_id("index")
                .with_module(RouteModule::handler(login)),
            RouteNode::path("/profile")
                .with_id("profile")
                .with_module(RouteModule::handler(profile).with_precheck(RequireUser)),
            RouteNode::path("/about")
                .with_id("about")
                .with_module(RouteModule::view(AboutPage)),
            RouteNode::path("/boom").with_module(RouteModule::handler(boom)),
            RouteNode::path("/count").with_module(RouteModule::handler(count)),
            RouteNode::path("/whoami").with_module(RouteModule::handler(ExplicitContext)),
            RouteNode::path("/twice").with_module(RouteModule::handler(twice)),
            RouteNode::path("/settle").with_module(RouteModule::handler(settle)),
            RouteNode::path("/panic").with_module(RouteModule::handler(panics)),
            RouteNode::path("/broken").with_importer(broken),
        ])])
}

pub fn dispatcher(calls: &Calls) -> Dispatcher {
    Dispatcher::new(Arc::new(tree(calls)), &DispatchConfig::default()).with_renderer(Arc::new(NameRenderer))
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", "app.test")
        .body(Body::empty())
        .expect("valid request")
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// The `name=value` part of every `Set-Cookie` header.
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::to_string)
        .collect()
}
