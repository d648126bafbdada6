//! Route matching.
//!
//! # Responsibilities
//! - Walk the route tree depth-first, computing each node's effective pattern
//! - Test index nodes and nodes with their own pattern against the URL
//! - Return the chain of nodes from the root to the deepest match
//!
//! # Design Decisions
//! - First match wins: sibling order is the only tie-break
//! - Grouping nodes (no pattern, not index) are never tested themselves
//! - Index nodes never descend into children, even when configured with some
//! - A pattern that fails to compile matches nothing; the error is logged

use std::sync::Arc;

use futures_util::future::try_join_all;
use url::Url;

use crate::routing::pattern::{PatternCache, PatternInit, PatternMatch};
use crate::routing::tree::{ImportError, RouteModule, RouteNode, RouteTree};

/// One entry of a [`MatchChain`].
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub node: &'a RouteNode,
    /// The node's own match, or for enclosing nodes that were not matched
    /// themselves, the match of the deepest node.
    pub matched: PatternMatch,
    /// Whether the node's own effective pattern matched the URL.
    pub exact: bool,
}

/// Nodes from the root to the deepest matched node, inclusive.
#[derive(Debug, Clone)]
pub struct MatchChain<'a> {
    entries: Vec<RouteMatch<'a>>,
}

/// A module resolved for one node of a match chain.
#[derive(Debug, Clone)]
pub struct LoadedModule<'a> {
    pub node: &'a RouteNode,
    pub module: Arc<RouteModule>,
}

impl<'a> MatchChain<'a> {
    pub fn entries(&self) -> &[RouteMatch<'a>] {
        &self.entries
    }

    /// The deepest matched node. Chains are never empty.
    pub fn leaf(&self) -> &RouteMatch<'a> {
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node labels from root to leaf.
    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.node.label()).collect()
    }

    /// Resolve every importer along the chain concurrently, in chain order.
    /// Nodes without an importer contribute nothing.
    pub async fn load_modules(&self) -> Result<Vec<LoadedModule<'a>>, ImportError> {
        let loads = self.entries.iter().map(|entry| async move {
            let module = entry.node.load().await?;
            Ok::<_, ImportError>(module.map(|module| LoadedModule {
                node: entry.node,
                module,
            }))
        });
        Ok(try_join_all(loads).await?.into_iter().flatten().collect())
    }
}

/// Match `url` against the top-level routes of `tree`.
pub fn match_routes<'a>(tree: &'a RouteTree, url: &Url, cache: &PatternCache) -> Option<MatchChain<'a>> {
    tree.roots()
        .iter()
        .find_map(|root| match_node(root, url, None, cache))
        .map(|entries| MatchChain { entries })
}

fn match_node<'a>(
    node: &'a RouteNode,
    url: &Url,
    parent: Option<&PatternInit>,
    cache: &PatternCache,
) -> Option<Vec<RouteMatch<'a>>> {
    let effective = PatternInit::inherit(node.pattern(), parent);

    let own = if node.is_index() || node.pattern().is_some() {
        exec(&effective, url, cache, node)
    } else {
        None
    };

    if node.is_index() {
        if !node.children().is_empty() {
            tracing::warn!(route = %node.label(), "Index route has children; ignoring them");
        }
    } else {
        for child in node.children() {
            if let Some(mut entries) = match_node(child, url, Some(&effective), cache) {
                let entry = match &own {
                    Some(matched) => RouteMatch {
                        node,
                        matched: matched.clone(),
                        exact: true,
                    },
                    None => RouteMatch {
                        node,
                        matched: entries[entries.len() - 1].matched.clone(),
                        exact: false,
                    },
                };
                entries.insert(0, entry);
                return Some(entries);
            }
        }
    }

    own.map(|matched| {
        vec![RouteMatch {
            node,
            matched,
            exact: true,
        }]
    })
}

fn exec(effective: &PatternInit, url: &Url, cache: &PatternCache, node: &RouteNode) -> Option<PatternMatch> {
    match cache.get_or_compile(effective) {
        Ok(pattern) => {
            let matched = pattern.exec(url);
            tracing::trace!(
                route = %node.label(),
                pathname = ?effective.pathname,
                matched = matched.is_some(),
                "Tested route pattern"
            );
            matched
        }
        Err(e) => {
            tracing::error!(route = %node.label(), error = %e, "Route pattern failed to compile");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handler::View;

    struct Page;

    impl View for Page {
        fn name(&self) -> &str {
            "page"
        }
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("http://app.test{path}")).unwrap()
    }

    fn basic_tree() -> RouteTree {
        RouteTree::new([RouteNode::path("/").with_id("root").with_children([
            RouteNode::index().with_id("login"),
            RouteNode::path("/profile").with_id("profile"),
        ])])
    }

    fn labels(tree: &RouteTree, path: &str) -> Option<Vec<String>> {
        match_routes(tree, &url(path), &PatternCache::new()).map(|c| c.labels())
    }

    #[test]
    fn test_profile_matches_root_and_profile() {
        let tree = basic_tree();
        assert_eq!(labels(&tree, "/profile").unwrap(), vec!["root", "profile"]);
    }

    #[test]
    fn test_root_matches_index() {
        let tree = basic_tree();
        let cache = PatternCache::new();
        let chain = match_routes(&tree, &url("/"), &cache).unwrap();
        assert_eq!(chain.labels(), vec!["root", "login"]);
        assert!(chain.entries().iter().all(|e| e.exact));
    }

    #[test]
    fn test_unknown_path_is_no_match() {
        assert!(labels(&basic_tree(), "/unknown").is_none());
    }

    #[test]
    fn test_enclosing_node_is_not_exact() {
        let tree = basic_tree();
        let cache = PatternCache::new();
        let chain = match_routes(&tree, &url("/profile"), &cache).unwrap();
        assert!(!chain.entries()[0].exact);
        assert!(chain.leaf().exact);
        assert_eq!(chain.leaf().matched.pathname, "/profile");
    }

    #[test]
    fn test_first_sibling_wins() {
        let tree = RouteTree::new([RouteNode::new().with_children([
            RouteNode::path("/users/:id").with_id("first"),
            RouteNode::path("/users/me").with_id("second"),
        ])]);
        assert_eq!(labels(&tree, "/users/me").unwrap(), vec!["<group>", "first"]);
    }

    #[test]
    fn test_grouping_node_is_transparent() {
        let tree = RouteTree::new([RouteNode::new().with_id("layout").with_children([
            RouteNode::path("/a").with_id("a"),
        ])]);
        // the layout alone never matches
        assert!(labels(&tree, "/").is_none());
        assert_eq!(labels(&tree, "/a").unwrap(), vec!["layout", "a"]);
    }

    #[test]
    fn test_nested_paths_compose() {
        let tree = RouteTree::new([RouteNode::path("/a").with_id("a").with_child(
            RouteNode::path("/b").with_id("b").with_child(RouteNode::path("c").with_id("c")),
        )]);
        let cache = PatternCache::new();
        let chain = match_routes(&tree, &url("/a/b/c"), &cache).unwrap();
        assert_eq!(chain.labels(), vec!["a", "b", "c"]);
        assert_eq!(labels(&tree, "/a/b").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_parent_own_match_wins_when_children_fail() {
        let tree = RouteTree::new([RouteNode::path("/docs")
            .with_id("docs")
            .with_child(RouteNode::path("/guide").with_id("guide"))]);
        assert_eq!(labels(&tree, "/docs").unwrap(), vec!["docs"]);
    }

    #[test]
    fn test_index_children_never_match() {
        let tree = RouteTree::new([RouteNode::path("/")
            .with_id("root")
            .with_child(RouteNode::index().with_id("index").with_child(RouteNode::path("/x").with_id("x")))]);
        assert!(labels(&tree, "/x").is_none());
        assert_eq!(labels(&tree, "/").unwrap(), vec!["root", "index"]);
    }

    #[test]
    fn test_dead_leaf_never_matches() {
        let tree = RouteTree::new([RouteNode::new().with_id("dead")]);
        assert!(labels(&tree, "/").is_none());
        assert!(labels(&tree, "/anything").is_none());
    }

    #[test]
    fn test_bad_pattern_is_no_match() {
        let tree = RouteTree::new([RouteNode::path("/a/*/b"), RouteNode::path("/ok").with_id("ok")]);
        assert!(labels(&tree, "/a/x/b").is_none());
        assert_eq!(labels(&tree, "/ok").unwrap(), vec!["ok"]);
    }

    #[test]
    fn test_hostname_inherits_into_children() {
        let tree = RouteTree::new([
            RouteNode::new()
                .with_pattern(PatternInit::default().with_hostname("admin.test"))
                .with_id("admin")
                .with_child(RouteNode::path("/dash").with_id("dash")),
            RouteNode::path("/dash").with_id("public"),
        ]);
        let cache = PatternCache::new();
        let admin = Url::parse("http://admin.test/dash").unwrap();
        assert_eq!(match_routes(&tree, &admin, &cache).unwrap().labels(), vec!["admin", "dash"]);
        assert_eq!(labels(&tree, "/dash").unwrap(), vec!["public"]);
    }

    #[test]
    fn test_leaf_pattern_matches_url() {
        let tree = basic_tree();
        let cache = PatternCache::new();
        for path in ["/", "/profile", "/nope", "/profile/x"] {
            if let Some(chain) = match_routes(&tree, &url(path), &cache) {
                assert_eq!(chain.leaf().matched.pathname, path);
                assert!(chain.leaf().exact);
            }
        }
    }

    #[tokio::test]
    async fn test_load_modules_skips_pass_through_nodes() {
        let tree = RouteTree::new([RouteNode::path("/").with_id("root").with_child(
            RouteNode::path("/p").with_id("p").with_module(RouteModule::view(Page)),
        )]);
        let cache = PatternCache::new();
        let chain = match_routes(&tree, &url("/p"), &cache).unwrap();
        let modules = chain.load_modules().await.unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].node.id(), Some("p"));
    }
}
