//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteConfig[] + ModuleRegistry
//!     → tree.rs (RouteNode / RouteTree, immutable)
//!
//! Incoming Request URL
//!     → matcher.rs (depth-first walk, first match wins)
//!     → pattern.rs (effective pattern per node, compiled once, executed)
//!     → Return: MatchChain (root → deepest node) or no match
//! ```
//!
//! # Design Decisions
//! - Routes built at startup, immutable at runtime
//! - Deterministic: same input always matches same chain
//! - Sibling order is the only disambiguator between overlapping patterns

pub mod matcher;
pub mod pattern;
pub mod tree;

pub use matcher::{match_routes, LoadedModule, MatchChain, RouteMatch};
pub use pattern::{join_pathname, CompiledPattern, PatternCache, PatternError, PatternInit, PatternMatch};
pub use tree::{importer, ready, ImportError, Importer, ModuleKind, ModuleRegistry, RouteModule, RouteNode, RouteTree};
