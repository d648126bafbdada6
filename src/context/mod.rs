//! Ambient request context.
//!
//! # Data Flow
//! ```text
//! Dispatcher
//!     → RequestContext::new (bindings, cookies, wait_until, redirect slot)
//!     → with_context(ctx, handler future)
//!         → current() / env() / cookies() / redirect() from any depth
//!         → DurableStub::call → layer_durable → nested with_context
//!     → scope ends when the future completes
//! ```
//!
//! # Design Decisions
//! - Stored in a tokio task-local, so it follows the request's future across
//!   awaits and worker threads and is never visible to other tasks
//! - `RequestContext` is a handle over shared state: passing it explicitly
//!   and looking it up ambiently observe the same request
//! - Accessors outside a scope fail with `ContextError::NoContext`; there is
//!   no default context
//! - The redirect slot is write-once and shared with nested layers

pub mod cookie;
pub mod env;
pub mod tasks;

use std::future::Future;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use crate::dispatch::{HandlerError, Redirect, To};
use crate::durable::DurableState;

pub use self::cookie::{CookieHandler, Cookies};
pub use self::env::{Binding, Environment};
pub use self::tasks::WaitUntil;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Context invariant violations. All of these indicate caller misuse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("no request context is active; context accessors must run inside `with_context`")]
    NoContext,

    #[error("redirect already set to `{existing}`, refusing to redirect to `{attempted}`")]
    RedirectAlreadySet { existing: String, attempted: String },

    #[error("binding `{0}` is not available in this environment")]
    MissingBinding(String),

    #[error("binding `{name}` is not a {expected} binding")]
    BindingKind { name: String, expected: &'static str },

    #[error("no cookie accessor is attached to this context")]
    NoCookies,

    #[error("not running inside a durable object")]
    NotDurable,
}

/// What the host supplies for each request before dispatch.
#[derive(Clone, Debug, Default)]
pub struct BaseContext {
    /// Every binding of the deployment.
    pub bindings: Environment,
    pub wait_until: WaitUntil,
    /// Pre-built cookies. When `None` the dispatcher builds them from the
    /// request and writes their changes onto the response.
    pub cookies: Option<Cookies>,
}

impl BaseContext {
    pub fn new(bindings: Environment, wait_until: WaitUntil) -> Self {
        Self {
            bindings,
            wait_until,
            cookies: None,
        }
    }

    pub fn with_cookies(mut self, cookies: Cookies) -> Self {
        self.cookies = Some(cookies);
        self
    }
}

/// State of one in-flight request, or of one durable object call layered
/// on top of it.
#[derive(Clone)]
pub struct RequestContext {
    env: Environment,
    bindings: Environment,
    cookies: Option<Cookies>,
    wait_until: WaitUntil,
    durable: Option<DurableState>,
    redirect: Arc<OnceLock<Redirect>>,
}

impl RequestContext {
    /// A fresh context for one request. `env` starts as the full bindings.
    pub fn new(bindings: Environment, cookies: Option<Cookies>, wait_until: WaitUntil) -> Self {
        Self {
            env: bindings.clone(),
            bindings,
            cookies,
            wait_until,
            durable: None,
            redirect: Arc::new(OnceLock::new()),
        }
    }

    /// The environment visible to the running code.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Every binding of the deployment, used to wire durable objects.
    pub(crate) fn bindings(&self) -> &Environment {
        &self.bindings
    }

    pub fn cookies(&self) -> Result<&Cookies, ContextError> {
        self.cookies.as_ref().ok_or(ContextError::NoCookies)
    }

    pub fn durable(&self) -> Result<&DurableState, ContextError> {
        self.durable.as_ref().ok_or(ContextError::NotDurable)
    }

    /// Record the redirect target. Fails if one is already recorded.
    pub fn set_redirect(&self, to: impl Into<To>) -> Result<Redirect, ContextError> {
        self.record_redirect(Redirect::to(to))
    }

    /// Record a fully built redirect (e.g. with a custom status).
    pub fn record_redirect(&self, redirect: Redirect) -> Result<Redirect, ContextError> {
        let attempted = redirect.location().to_string();
        self.redirect.set(redirect.clone()).map_err(|_| ContextError::RedirectAlreadySet {
            existing: self
                .redirect
                .get()
                .map(|r| r.location().to_string())
                .unwrap_or_default(),
            attempted,
        })?;
        Ok(redirect)
    }

    pub fn pending_redirect(&self) -> Option<&Redirect> {
        self.redirect.get()
    }

    /// Keep `task` running after the response, inside this context.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.wait_until.register(CURRENT.scope(self.clone(), task));
    }

    /// The same request seen through only the `names` bindings.
    pub fn restrict<I, S>(&self, names: I) -> Result<Self, ContextError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            env: self.env.restrict(names)?,
            ..self.clone()
        })
    }

    /// A nested layer for code running inside a durable object.
    pub fn layer_durable(&self, state: DurableState, env: Environment) -> Self {
        Self {
            env,
            durable: Some(state),
            ..self.clone()
        }
    }

    /// Whether `other` belongs to the same request (any layer or view).
    pub fn same_request(&self, other: &RequestContext) -> bool {
        Arc::ptr_eq(&self.redirect, &other.redirect)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("env", &self.env.names().collect::<Vec<_>>())
            .field("cookies", &self.cookies.is_some())
            .field("durable", &self.durable.as_ref().map(|d| d.id().to_string()))
            .field("pending_redirect", &self.redirect.get())
            .finish()
    }
}

/// Run `body` with `context` installed as the current context.
pub async fn with_context<F>(context: RequestContext, body: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(context, body).await
}

/// Synchronous counterpart of [`with_context`].
pub fn with_context_sync<R>(context: RequestContext, body: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(context, body)
}

/// The innermost active context.
pub fn current() -> Result<RequestContext, ContextError> {
    CURRENT.try_with(Clone::clone).map_err(|_| ContextError::NoContext)
}

pub fn try_current() -> Option<RequestContext> {
    CURRENT.try_with(Clone::clone).ok()
}

pub fn env() -> Result<Environment, ContextError> {
    CURRENT
        .try_with(|c| c.env.clone())
        .map_err(|_| ContextError::NoContext)
}

pub fn cookies() -> Result<Cookies, ContextError> {
    current()?.cookies().cloned()
}

pub fn durable() -> Result<DurableState, ContextError> {
    current()?.durable().cloned()
}

/// Record a redirect on the current context and return the error that
/// carries it out of the handler: `return Err(context::redirect("/"));`
///
/// Outside a scope, or when a redirect is already recorded, the returned
/// error is the corresponding `ContextError` instead.
pub fn redirect(to: impl Into<To>) -> HandlerError {
    match current().and_then(|c| c.set_redirect(to)) {
        Ok(redirect) => HandlerError::Redirect(redirect),
        Err(e) => HandlerError::Context(e),
    }
}

/// Register background work on the current request.
pub fn wait_until<F>(task: F) -> Result<(), ContextError>
where
    F: Future<Output = ()> + Send + 'static,
{
    current()?.wait_until(task);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RequestContext {
        let env = Environment::new().with("GREETING", Binding::var("hello"));
        RequestContext::new(env, Some(Cookies::parse::<&str>(Some("a=1"), &[])), WaitUntil::new())
    }

    #[test]
    fn test_accessors_fail_outside_scope() {
        assert_eq!(current().unwrap_err(), ContextError::NoContext);
        assert_eq!(env().unwrap_err(), ContextError::NoContext);
        assert!(cookies().is_err());
        assert!(matches!(
            redirect("/"),
            HandlerError::Context(ContextError::NoContext)
        ));
        assert_eq!(wait_until(async {}).unwrap_err(), ContextError::NoContext);
    }

    #[tokio::test]
    async fn test_current_visible_across_awaits() {
        let ctx = context();
        let seen = with_context(ctx.clone(), async {
            tokio::task::yield_now().await;
            nested().await
        })
        .await;
        assert_eq!(seen.as_deref(), Some("hello"));
        assert!(try_current().is_none());
    }

    async fn nested() -> Option<String> {
        tokio::task::yield_now().await;
        env().ok()?.var("GREETING").ok().map(str::to_string)
    }

    #[tokio::test]
    async fn test_innermost_scope_wins() {
        let outer = context();
        let inner = outer.restrict(Vec::<String>::new()).unwrap();
        with_context(outer, async move {
            assert_eq!(env().unwrap().len(), 1);
            with_context(inner, async {
                assert!(env().unwrap().is_empty());
            })
            .await;
            assert_eq!(env().unwrap().len(), 1);
        })
        .await;
    }

    #[test]
    fn test_redirect_is_write_once() {
        let ctx = context();
        assert_eq!(ctx.set_redirect("/profile").unwrap().location(), "/profile");
        assert_eq!(
            ctx.set_redirect("/").unwrap_err(),
            ContextError::RedirectAlreadySet {
                existing: "/profile".into(),
                attempted: "/".into(),
            }
        );
        assert_eq!(ctx.pending_redirect().unwrap().location(), "/profile");
    }

    #[tokio::test]
    async fn test_redirect_helper_records_on_current() {
        let ctx = context();
        let first = with_context(ctx.clone(), async { redirect("/next") }).await;
        assert!(first.is_redirect());
        let second = with_context(ctx.clone(), async { redirect("/other") }).await;
        assert!(matches!(
            second,
            HandlerError::Context(ContextError::RedirectAlreadySet { .. })
        ));
        assert_eq!(ctx.pending_redirect().unwrap().location(), "/next");
    }

    #[test]
    fn test_views_share_the_request() {
        let ctx = context();
        let view = ctx.restrict(["GREETING"]).unwrap();
        assert!(view.same_request(&ctx));
        view.set_redirect("/x").unwrap();
        assert_eq!(ctx.pending_redirect().unwrap().location(), "/x");
        assert!(!context().same_request(&ctx));
    }

    #[tokio::test]
    async fn test_wait_until_runs_inside_context() {
        let ctx = context();
        let tasks = ctx.wait_until.clone();
        let (tx, rx) = tokio::sync::oneshot::channel();
        with_context(ctx, async move {
            wait_until(async move {
                let greeting = env().ok().and_then(|e| e.var("GREETING").ok().map(str::to_string));
                let _ = tx.send(greeting);
            })
            .unwrap();
        })
        .await;
        tasks.drain().await;
        assert_eq!(rx.await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_concurrent_scopes_are_isolated() {
        let make = |value: &str| {
            RequestContext::new(
                Environment::new().with("WHO", Binding::var(value)),
                None,
                WaitUntil::new(),
            )
        };

        let observe = |ctx: RequestContext, expected: &'static str| {
            with_context(ctx.clone(), async move {
                for _ in 0..50 {
                    tokio::task::yield_now().await;
                    let ambient = current().unwrap();
                    assert!(ambient.same_request(&ctx));
                    assert_eq!(ambient.env().var("WHO").unwrap(), expected);
                    assert_eq!(ctx.env().var("WHO").unwrap(), expected);
                }
            })
        };

        let a = tokio::spawn(observe(make("alice"), "alice"));
        let b = tokio::spawn(observe(make("bob"), "bob"));
        let (c, d) = tokio::join!(observe(make("carol"), "carol"), observe(make("dave"), "dave"));
        let _ = (c, d);
        a.await.unwrap();
        b.await.unwrap();
    }
}
