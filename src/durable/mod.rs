//! Durable objects: long-lived, addressable, single-instance state.
//!
//! # Data Flow
//! ```text
//! handler
//!     → env().durable::<T>("PROFILE")      (DurableNamespace<T>)
//!     → namespace.id_from_name(user_id)     (DurableId, stable per name)
//!     → namespace.get(&id)                  (DurableStub<T>)
//!     → stub.call(|obj| ...)
//!         → instance created once per id, inside a durable context
//!         → wait for any block_concurrency_while section
//!         → closure runs inside a nested context layering the durable state
//! ```
//!
//! # Design Decisions
//! - A durable object's environment holds only its declared dependencies,
//!   resolved from the full bindings of the calling request
//! - Nested contexts share the caller's cookies, redirect slot and
//!   background-task registrar
//! - Storage is per id and outlives requests

pub mod storage;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;

use crate::context::{self, Environment, RequestContext};
use crate::dispatch::HandlerError;

pub use self::storage::{ListOptions, MemoryStorage, Storage, StorageError};

/// A class of durable object.
#[async_trait]
pub trait DurableObject: Send + Sync + 'static {
    /// Handle a raw request forwarded through [`DurableStub::fetch`].
    async fn fetch(&self, _request: Request<Body>) -> Result<Response, HandlerError> {
        Ok(StatusCode::NOT_IMPLEMENTED.into_response())
    }
}

/// Identity of one durable object instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DurableId {
    hex: String,
    name: Option<String>,
}

impl DurableId {
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The name this id was derived from, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for DurableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

/// Per-instance state handed to the object and visible through
/// [`context::durable`].
#[derive(Clone)]
pub struct DurableState {
    id: DurableId,
    storage: Arc<dyn Storage>,
    gate: Arc<RwLock<()>>,
}

impl DurableState {
    pub fn new(id: DurableId, storage: Arc<dyn Storage>) -> Self {
        Self {
            id,
            storage,
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn id(&self) -> &DurableId {
        &self.id
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// Run `section` while holding off every other call to this instance.
    ///
    /// Calling the same instance from inside `section` deadlocks.
    pub async fn block_concurrency_while<F, Fut, R>(&self, section: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        let _gate = self.gate.write().await;
        section().await
    }

    async fn wait_for_gate(&self) {
        drop(self.gate.read().await);
    }
}

impl fmt::Debug for DurableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableState").field("id", &self.id).finish()
    }
}

type Constructor<T> =
    Arc<dyn Fn(DurableState, Environment) -> BoxFuture<'static, Result<T, HandlerError>> + Send + Sync>;

type StorageFactory = Arc<dyn Fn(&DurableId) -> Arc<dyn Storage> + Send + Sync>;

struct Instance<T> {
    object: Arc<T>,
    state: DurableState,
    env: Environment,
}

struct NamespaceInner<T> {
    name: String,
    namespace_uuid: Uuid,
    dependencies: Vec<String>,
    constructor: Constructor<T>,
    storage: StorageFactory,
    instances: DashMap<String, Arc<OnceCell<Arc<Instance<T>>>>>,
}

/// A binding addressing every instance of durable object class `T`.
pub struct DurableNamespace<T> {
    inner: Arc<NamespaceInner<T>>,
}

impl<T> Clone for DurableNamespace<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: DurableObject> DurableNamespace<T> {
    /// `dependencies` are the binding names the object's environment holds.
    /// `constructor` runs once per id inside the object's durable context.
    pub fn new<I, S, F, Fut>(name: impl Into<String>, dependencies: I, constructor: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(DurableState, Environment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        Self {
            inner: Arc::new(NamespaceInner {
                namespace_uuid: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
                name,
                dependencies: dependencies.into_iter().map(Into::into).collect(),
                constructor: Arc::new(move |state, env| Box::pin(constructor(state, env))),
                storage: Arc::new(|_| Arc::new(MemoryStorage::new())),
                instances: DashMap::new(),
            }),
        }
    }

    /// Replace the per-id storage backend. Only affects instances created
    /// afterwards.
    pub fn with_storage<F>(self, factory: F) -> Self
    where
        F: Fn(&DurableId) -> Arc<dyn Storage> + Send + Sync + 'static,
    {
        let inner = NamespaceInner {
            name: self.inner.name.clone(),
            namespace_uuid: self.inner.namespace_uuid,
            dependencies: self.inner.dependencies.clone(),
            constructor: self.inner.constructor.clone(),
            storage: Arc::new(factory),
            instances: DashMap::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.inner.dependencies
    }

    /// The same name always yields the same id within a namespace.
    pub fn id_from_name(&self, name: &str) -> DurableId {
        DurableId {
            hex: Uuid::new_v5(&self.inner.namespace_uuid, name.as_bytes())
                .simple()
                .to_string(),
            name: Some(name.to_string()),
        }
    }

    pub fn new_unique_id(&self) -> DurableId {
        DurableId {
            hex: Uuid::new_v4().simple().to_string(),
            name: None,
        }
    }

    pub fn get(&self, id: &DurableId) -> DurableStub<T> {
        DurableStub {
            namespace: self.clone(),
            id: id.clone(),
        }
    }

    /// Number of constructed instances.
    pub fn instance_count(&self) -> usize {
        self.inner
            .instances
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    async fn instance(
        &self,
        id: &DurableId,
        caller: &RequestContext,
    ) -> Result<Arc<Instance<T>>, HandlerError> {
        let cell = self
            .inner
            .instances
            .entry(id.hex().to_string())
            .or_default()
            .clone();

        cell.get_or_try_init(|| async {
            let state = DurableState::new(id.clone(), (self.inner.storage)(id));
            let env = caller.bindings().restrict(&self.inner.dependencies)?;
            let layer = caller.layer_durable(state.clone(), env.clone());
            let object =
                context::with_context(layer, (self.inner.constructor)(state.clone(), env.clone()))
                    .await?;
            tracing::debug!(namespace = %self.inner.name, id = %id, "Constructed durable object");
            Ok::<_, HandlerError>(Arc::new(Instance {
                object: Arc::new(object),
                state,
                env,
            }))
        })
        .await
        .cloned()
    }
}

impl<T> fmt::Debug for DurableNamespace<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DurableNamespace")
            .field("name", &self.inner.name)
            .field("dependencies", &self.inner.dependencies)
            .finish()
    }
}

/// Handle for calling one durable object instance.
pub struct DurableStub<T> {
    namespace: DurableNamespace<T>,
    id: DurableId,
}

impl<T> Clone for DurableStub<T> {
    fn clone(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            id: self.id.clone(),
        }
    }
}

impl<T: DurableObject> DurableStub<T> {
    pub fn id(&self) -> &DurableId {
        &self.id
    }

    /// Run `call` against the instance inside its durable context.
    ///
    /// Must be invoked from within a request context.
    pub async fn call<F, Fut, R>(&self, call: F) -> Result<R, HandlerError>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<R, HandlerError>>,
    {
        let caller = context::current()?;
        let instance = self.namespace.instance(&self.id, &caller).await?;
        instance.state.wait_for_gate().await;

        let layer = caller.layer_durable(instance.state.clone(), instance.env.clone());
        context::with_context(layer, call(instance.object.clone())).await
    }

    pub async fn fetch(&self, request: Request<Body>) -> Result<Response, HandlerError> {
        self.call(|object| async move { object.fetch(request).await })
            .await
    }
}
