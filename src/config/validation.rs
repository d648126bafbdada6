//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the route tree shape (index nodes, dead leaves, duplicate ids)
//! - Validate value ranges (timeouts > 0, redirect status is 3xx)
//! - Check pattern fragments compile and service urls are plain `http`
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::bindings::fetcher::parse_upstream;
use crate::config::schema::{BindingConfig, RouteConfig, RouterConfig};
use crate::routing::{CompiledPattern, PatternInit};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid listener address `{0}`")]
    BindAddress(String),

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,

    #[error("redirect status {0} is not a 3xx code")]
    RedirectStatus(u16),

    #[error("binding `{name}` has invalid service url `{url}`")]
    ServiceUrl { name: String, url: String },

    #[error("index route `{0}` has children")]
    IndexWithChildren(String),

    #[error("route `{0}` has an empty module name")]
    EmptyModule(String),

    #[error("route `{0}` has no pattern, no index flag and no children; it can never match")]
    DeadLeaf(String),

    #[error("route id `{0}` is used more than once")]
    DuplicateId(String),

    #[error("route `{route}` has an invalid pattern: {reason}")]
    Pattern { route: String, reason: String },
}

pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if !(300..400).contains(&config.dispatch.redirect_status) {
        errors.push(ValidationError::RedirectStatus(config.dispatch.redirect_status));
    }

    for (name, binding) in &config.bindings {
        if let BindingConfig::Service { url } = binding {
            if parse_upstream(url).is_err() {
                errors.push(ValidationError::ServiceUrl {
                    name: name.clone(),
                    url: url.clone(),
                });
            }
        }
    }

    let mut ids = HashSet::new();
    for route in &config.routes {
        validate_route(route, None, &mut ids, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_route(
    route: &RouteConfig,
    parent: Option<&PatternInit>,
    ids: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    let label = route.label();

    if let Some(id) = &route.id {
        if !ids.insert(id.clone()) {
            errors.push(ValidationError::DuplicateId(id.clone()));
        }
    }
    if route.module.as_deref().is_some_and(|m| m.trim().is_empty()) {
        errors.push(ValidationError::EmptyModule(label.clone()));
    }
    if route.index && !route.children.is_empty() {
        errors.push(ValidationError::IndexWithChildren(label.clone()));
    }

    let own = route.effective_pattern();
    if !route.index && own.is_none() && route.children.is_empty() {
        errors.push(ValidationError::DeadLeaf(label.clone()));
    }

    let effective = PatternInit::inherit(own.as_ref(), parent);
    if let Err(e) = CompiledPattern::compile(&effective) {
        errors.push(ValidationError::Pattern {
            route: label,
            reason: e.to_string(),
        });
    }

    for child in &route.children {
        validate_route(child, Some(&effective), ids, errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(toml: &str) -> RouterConfig {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_valid_config() {
        let config = routes(
            r#"
            [[routes]]
            module = "shell"
              [[routes.children]]
              index = true
              module = "login"
              [[routes.children]]
              path = "/profile/:tab?"
              module = "profile"
            "#,
        );
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn test_route_shape_errors() {
        let config = routes(
            r#"
            [[routes]]
            id = "dup"
            index = true
              [[routes.children]]
              id = "dup"
              path = "/x"

            [[routes]]
            module = ""
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::IndexWithChildren("dup".into())));
        assert!(errors.contains(&ValidationError::DuplicateId("dup".into())));
        assert!(errors.contains(&ValidationError::EmptyModule("".into())));
        assert!(errors.contains(&ValidationError::DeadLeaf("".into())));
    }

    #[test]
    fn test_bad_pattern_and_values() {
        let mut config = routes(
            r#"
            [bindings.API]
            kind = "service"
            url = "not a url"

            [[routes]]
            path = "/files/*/edit"
            "#,
        );
        config.timeouts.request_secs = 0;
        config.listener.bind_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroTimeout));
        assert!(errors.contains(&ValidationError::BindAddress("nowhere".into())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::ServiceUrl { name, .. } if name == "API")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::Pattern { route, .. } if route == "/files/*/edit")));
    }

    #[test]
    fn test_service_url_must_be_http() {
        let config = routes(
            r#"
            [bindings.SECURE]
            kind = "service"
            url = "https://upstream.test"

            [bindings.RELATIVE]
            kind = "service"
            url = "/api"

            [bindings.PLAIN]
            kind = "service"
            url = "http://127.0.0.1:9000/api"

            [[routes]]
            path = "/"
            module = "home"
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        let names: HashSet<&str> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::ServiceUrl { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, HashSet::from(["SECURE", "RELATIVE"]));
    }
}
