//! Environment bindings.
//!
//! A binding is a named handle to an external capability: a plain string
//! variable, a service reachable through [`Fetcher`], or a durable object
//! namespace. Handlers see a view restricted to the names they declared.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::bindings::Fetcher;
use crate::context::ContextError;
use crate::durable::{DurableNamespace, DurableObject};

/// A single named binding.
#[derive(Clone)]
pub enum Binding {
    /// A string value, e.g. a secret.
    Var(String),
    /// A service reachable over `fetch`.
    Service(Arc<dyn Fetcher>),
    /// A `DurableNamespace<T>`, type-erased.
    Durable(Arc<dyn Any + Send + Sync>),
}

impl Binding {
    pub fn var(value: impl Into<String>) -> Self {
        Binding::Var(value.into())
    }

    pub fn service(fetcher: impl Fetcher + 'static) -> Self {
        Binding::Service(Arc::new(fetcher))
    }

    pub fn durable<T: DurableObject>(namespace: DurableNamespace<T>) -> Self {
        Binding::Durable(Arc::new(namespace))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Binding::Var(_) => "var",
            Binding::Service(_) => "service",
            Binding::Durable(_) => "durable",
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // never print secret values
            Binding::Var(_) => f.write_str("Var(..)"),
            Binding::Service(_) => f.write_str("Service(..)"),
            Binding::Durable(_) => f.write_str("Durable(..)"),
        }
    }
}

/// A mapping from binding name to binding. Cheap to clone.
#[derive(Clone, Default, Debug)]
pub struct Environment {
    bindings: Arc<HashMap<String, Binding>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a binding.
    pub fn with(mut self, name: impl Into<String>, binding: Binding) -> Self {
        Arc::make_mut(&mut self.bindings).insert(name.into(), binding);
        self
    }

    pub fn get(&self, name: &str) -> Result<&Binding, ContextError> {
        self.bindings
            .get(name)
            .ok_or_else(|| ContextError::MissingBinding(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn var(&self, name: &str) -> Result<&str, ContextError> {
        match self.get(name)? {
            Binding::Var(value) => Ok(value),
            _ => Err(kind_error(name, "var")),
        }
    }

    pub fn service(&self, name: &str) -> Result<Arc<dyn Fetcher>, ContextError> {
        match self.get(name)? {
            Binding::Service(fetcher) => Ok(fetcher.clone()),
            _ => Err(kind_error(name, "service")),
        }
    }

    /// Look up a durable namespace binding of object type `T`.
    pub fn durable<T: DurableObject>(&self, name: &str) -> Result<DurableNamespace<T>, ContextError> {
        match self.get(name)? {
            Binding::Durable(any) => any
                .downcast_ref::<DurableNamespace<T>>()
                .cloned()
                .ok_or_else(|| kind_error(name, std::any::type_name::<T>())),
            _ => Err(kind_error(name, "durable")),
        }
    }

    /// A view holding only `names`. Every name must be bound.
    pub fn restrict<I, S>(&self, names: I) -> Result<Environment, ContextError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut view = HashMap::new();
        for name in names {
            let name = name.as_ref();
            view.insert(name.to_string(), self.get(name)?.clone());
        }
        Ok(Environment {
            bindings: Arc::new(view),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Binding)> for Environment {
    fn from_iter<I: IntoIterator<Item = (S, Binding)>>(iter: I) -> Self {
        Environment {
            bindings: Arc::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

fn kind_error(name: &str, expected: &'static str) -> ContextError {
    ContextError::BindingKind {
        name: name.to_string(),
        expected,
    }
}
