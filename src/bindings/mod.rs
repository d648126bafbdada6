//! Binding metadata and service bindings.
//!
//! # Responsibilities
//! - Record which bindings each binding depends on (`BindingsMeta`)
//! - Check an environment provides everything that is declared
//! - Service binding transports (`Fetcher`, `HttpFetcher`, `EntryFetcher`)

pub mod fetcher;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::context::Environment;

pub use self::fetcher::{EntryFetcher, FetchError, Fetcher, HttpFetcher};

/// Binding name → names of the bindings it depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingsMeta {
    bindings: BTreeMap<String, Vec<String>>,
}

impl BindingsMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare<I, S>(mut self, name: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bindings
            .insert(name.into(), dependencies.into_iter().map(Into::into).collect());
        self
    }

    /// Direct dependencies of `name`; empty when undeclared.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.bindings.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every binding reachable from `name`, excluding `name` itself unless
    /// it is part of a cycle.
    pub fn transitive(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependencies(name).iter().map(String::as_str).collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.to_string()) {
                stack.extend(self.dependencies(next).iter().map(String::as_str));
            }
        }
        seen
    }

    /// Declared or depended-on names that `env` does not bind.
    pub fn missing_in(&self, env: &Environment) -> BTreeSet<String> {
        self.bindings
            .iter()
            .flat_map(|(name, deps)| std::iter::once(name).chain(deps))
            .filter(|name| !env.contains(name))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Build-time metadata shipped alongside an application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMeta {
    pub bindings: BindingsMeta,
}
