//! Static route tree.
//!
//! # Responsibilities
//! - Hold route nodes (pattern fragment, index flag, lazy module importer)
//! - Resolve importers, memoizing modules on nodes marked `cache`
//! - Build a tree from the declarative route configuration
//!
//! # Design Decisions
//! - Immutable after construction; shared across requests behind `Arc`
//! - Modules declare their kind explicitly (`ModuleKind`), so the
//!   dispatcher never inspects module shape at runtime

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::loader::ConfigError;
use crate::config::RouteConfig;
use crate::dispatch::handler::{Precheck, ServerModule, View};
use crate::routing::pattern::PatternInit;

/// A route module failed to load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("module import failed: {0}")]
pub struct ImportError(pub String);

impl ImportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Future produced by an [`Importer`].
pub type ModuleFuture = BoxFuture<'static, Result<Arc<RouteModule>, ImportError>>;

/// Lazy factory producing a route module.
pub type Importer = Arc<dyn Fn() -> ModuleFuture + Send + Sync>;

/// Wrap an async loader function as an [`Importer`].
pub fn importer<F, Fut>(load: F) -> Importer
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RouteModule, ImportError>> + Send + 'static,
{
    Arc::new(move || {
        let fut = load();
        Box::pin(async move { fut.await.map(Arc::new) })
    })
}

/// An importer that always resolves to a copy of an already-built module.
pub fn ready(module: RouteModule) -> Importer {
    let module = Arc::new(module);
    Arc::new(move || {
        let module = module.clone();
        Box::pin(async move { Ok(module) })
    })
}

/// What a route module exports.
#[derive(Clone)]
pub enum ModuleKind {
    /// Imperative handler exposing `fetch`.
    Handler(Arc<dyn ServerModule>),
    /// Declarative UI, handed to the rendering collaborator.
    View(Arc<dyn View>),
}

/// A loaded route module.
#[derive(Clone)]
pub struct RouteModule {
    kind: ModuleKind,
    precheck: Option<Arc<dyn Precheck>>,
}

impl RouteModule {
    pub fn handler(module: impl ServerModule + 'static) -> Self {
        Self {
            kind: ModuleKind::Handler(Arc::new(module)),
            precheck: None,
        }
    }

    pub fn view(view: impl View + 'static) -> Self {
        Self {
            kind: ModuleKind::View(Arc::new(view)),
            precheck: None,
        }
    }

    /// Attach a hook that runs before the terminal module is dispatched.
    pub fn with_precheck(mut self, precheck: impl Precheck + 'static) -> Self {
        self.precheck = Some(Arc::new(precheck));
        self
    }

    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    pub fn precheck(&self) -> Option<&Arc<dyn Precheck>> {
        self.precheck.as_ref()
    }
}

impl fmt::Debug for RouteModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            ModuleKind::Handler(_) => "handler",
            ModuleKind::View(view) => view.name(),
        };
        f.debug_struct("RouteModule")
            .field("kind", &kind)
            .field("precheck", &self.precheck.is_some())
            .finish()
    }
}

/// One node of the route tree.
pub struct RouteNode {
    id: Option<String>,
    pattern: Option<PatternInit>,
    index: bool,
    importer: Option<Importer>,
    children: Vec<RouteNode>,
    cache: bool,
    cached: OnceCell<Arc<RouteModule>>,
}

impl RouteNode {
    /// A grouping node: no pattern of its own, never tested directly.
    pub fn new() -> Self {
        Self {
            id: None,
            pattern: None,
            index: false,
            importer: None,
            children: Vec::new(),
            cache: false,
            cached: OnceCell::new(),
        }
    }

    /// An index node: matches its parent's pathname exactly.
    pub fn index() -> Self {
        Self {
            index: true,
            ..Self::new()
        }
    }

    /// A node constrained by a pathname fragment.
    pub fn path(pathname: impl Into<String>) -> Self {
        Self::new().with_pattern(PatternInit::pathname(pathname))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_pattern(mut self, pattern: PatternInit) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_importer(mut self, importer: Importer) -> Self {
        self.importer = Some(importer);
        self
    }

    /// Shorthand for an importer resolving to `module`.
    pub fn with_module(self, module: RouteModule) -> Self {
        self.with_importer(ready(module))
    }

    /// Add a child. Children of index nodes are never matched.
    pub fn with_child(mut self, child: RouteNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = RouteNode>) -> Self {
        self.children.extend(children);
        self
    }

    /// Reuse the loaded module across requests.
    pub fn cacheable(mut self) -> Self {
        self.cache = true;
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn pattern(&self) -> Option<&PatternInit> {
        self.pattern.as_ref()
    }

    pub fn is_index(&self) -> bool {
        self.index
    }

    pub fn children(&self) -> &[RouteNode] {
        &self.children
    }

    pub fn has_importer(&self) -> bool {
        self.importer.is_some()
    }

    pub fn is_cacheable(&self) -> bool {
        self.cache
    }

    /// Label for logs: the id, else the pathname fragment, else a kind marker.
    pub fn label(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        match (&self.pattern, self.index) {
            (Some(PatternInit { pathname: Some(p), .. }), _) => p.clone(),
            (_, true) => "<index>".to_string(),
            _ => "<group>".to_string(),
        }
    }

    /// Resolve this node's module. `None` for pass-through nodes.
    pub async fn load(&self) -> Result<Option<Arc<RouteModule>>, ImportError> {
        let Some(importer) = &self.importer else {
            return Ok(None);
        };

        if self.cache {
            let module = self.cached.get_or_try_init(|| importer()).await?;
            return Ok(Some(module.clone()));
        }

        importer().await.map(Some)
    }
}

impl Default for RouteNode {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("index", &self.index)
            .field("importer", &self.importer.is_some())
            .field("cache", &self.cache)
            .field("children", &self.children)
            .finish()
    }
}

/// Named importers that route configuration can refer to.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Importer>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, name: impl Into<String>, importer: Importer) -> Self {
        self.modules.insert(name.into(), importer);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Importer> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }
}

/// The ordered top-level routes of an application.
#[derive(Debug, Default)]
pub struct RouteTree {
    roots: Vec<RouteNode>,
}

impl RouteTree {
    pub fn new(roots: impl IntoIterator<Item = RouteNode>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }

    pub fn roots(&self) -> &[RouteNode] {
        &self.roots
    }

    /// Build a tree from configuration, resolving module names in `registry`.
    pub fn from_config(routes: &[RouteConfig], registry: &ModuleRegistry) -> Result<Self, ConfigError> {
        let roots = routes
            .iter()
            .map(|route| build_node(route, registry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { roots })
    }
}

fn build_node(route: &RouteConfig, registry: &ModuleRegistry) -> Result<RouteNode, ConfigError> {
    let mut node = RouteNode::new();
    node.index = route.index;
    node.cache = route.cache;
    node.id = route.id.clone();
    node.pattern = route.effective_pattern();

    if let Some(name) = &route.module {
        let importer = registry.get(name).ok_or_else(|| ConfigError::UnknownModule {
            route: route.label(),
            module: name.clone(),
        })?;
        node.importer = Some(importer.clone());
    }

    for child in &route.children {
        node.children.push(build_node(child, registry)?);
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::dispatch::handler::View;

    struct Page(&'static str);

    impl View for Page {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn counting_importer(counter: Arc<AtomicUsize>) -> Importer {
        importer(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(RouteModule::view(Page("page")))
            }
        })
    }

    #[tokio::test]
    async fn test_load_without_importer_is_pass_through() {
        let node = RouteNode::path("/layout");
        assert!(node.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cacheable_node_loads_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let node = RouteNode::path("/a")
            .with_importer(counting_importer(counter.clone()))
            .cacheable();

        let first = node.load().await.unwrap().unwrap();
        let second = node.load().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_uncached_node_loads_every_time() {
        let counter = Arc::new(AtomicUsize::new(0));
        let node = RouteNode::path("/a").with_importer(counting_importer(counter.clone()));

        node.load().await.unwrap();
        node.load().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_import_failure_propagates() {
        let node = RouteNode::path("/broken").with_importer(importer(|| async {
            Err(ImportError::new("chunk missing"))
        }));
        assert_eq!(node.load().await.unwrap_err(), ImportError::new("chunk missing"));
    }

    #[test]
    fn test_from_config_resolves_modules() {
        let config: Vec<RouteConfig> = toml::from_str::<crate::config::RouterConfig>(
            r#"
            [[routes]]
            id = "shell"
            module = "shell"

              [[routes.children]]
              index = true
              module = "login"

              [[routes.children]]
              path = "/profile"
              module = "profile"
              cache = true
            "#,
        )
        .unwrap()
        .routes;

        let registry = ModuleRegistry::new()
            .register("shell", ready(RouteModule::view(Page("shell"))))
            .register("login", ready(RouteModule::view(Page("login"))))
            .register("profile", ready(RouteModule::view(Page("profile"))));

        let tree = RouteTree::from_config(&config, &registry).unwrap();
        let root = &tree.roots()[0];
        assert_eq!(root.id(), Some("shell"));
        assert!(root.children()[0].is_index());
        assert_eq!(
            root.children()[1].pattern().and_then(|p| p.pathname.as_deref()),
            Some("/profile")
        );
        assert!(root.children()[1].is_cacheable());
    }

    #[test]
    fn test_from_config_unknown_module() {
        let config = vec![RouteConfig {
            module: Some("missing".into()),
            ..RouteConfig::default()
        }];
        let err = RouteTree::from_config(&config, &ModuleRegistry::new()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModule { module, .. } if module == "missing"));
    }
}
