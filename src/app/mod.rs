//! Demo application served by the binary.
//!
//! Routes (see [`DEFAULT_CONFIG`]):
//! - `/` login form; posting valid credentials signs the `userId` cookie
//! - `/profile` profile form, only for signed-in users
//! - `/about` a pure view page rendered through [`shell::HtmlRenderer`]
//! - `/api/ping`, `/api/status`, `/api/profile` JSON endpoints

pub mod api;
pub mod db;
pub mod login;
pub mod profile;
pub mod shell;

use std::collections::HashMap;

use axum::body::Body;
use axum::http::Request;
use edge_router::bindings::BindingsMeta;
use edge_router::context::{Binding, Environment};
use edge_router::routing::{ready, ModuleRegistry, RouteModule};
use edge_router::HandlerError;

pub const USER_COOKIE: &str = "userId";

const MAX_FORM_BYTES: usize = 16 * 1024;

/// Used when no `--config` is given.
pub const DEFAULT_CONFIG: &str = r#"
[listener]
bind_address = "127.0.0.1:8080"

[bindings.COOKIE_SECRET]
kind = "var"
value = "development-only-cookie-secret"

[[routes]]
id = "shell"
module = "global-shell"

  [[routes.children]]
  id = "login"
  index = true
  module = "login"

  [[routes.children]]
  id = "profile"
  path = "/profile"
  module = "profile"
  cache = true

  [[routes.children]]
  id = "about"
  path = "/about"
  module = "about"
  cache = true

[[routes]]
path = "/api"

  [[routes.children]]
  path = "/ping"
  module = "api-ping"
  cache = true

  [[routes.children]]
  path = "/status"
  module = "api-status"
  cache = true

  [[routes.children]]
  path = "/profile"
  module = "api-profile"
  cache = true
"#;

pub fn registry() -> ModuleRegistry {
    ModuleRegistry::new()
        .register("global-shell", ready(RouteModule::view(shell::GlobalShell)))
        .register("login", ready(RouteModule::handler(login::LoginModule)))
        .register(
            "profile",
            ready(RouteModule::handler(profile::ProfilePageModule).with_precheck(profile::RequireUser)),
        )
        .register("about", ready(RouteModule::view(shell::AboutPage)))
        .register("api-ping", ready(RouteModule::handler(api::PingModule)))
        .register("api-status", ready(RouteModule::handler(api::StatusModule)))
        .register("api-profile", ready(RouteModule::handler(api::ProfileApiModule)))
}

/// Durable namespaces; everything else comes from config.
pub fn bindings() -> Environment {
    Environment::new()
        .with(db::BINDING, Binding::durable(db::namespace()))
        .with(profile::BINDING, Binding::durable(profile::namespace()))
}

pub fn meta() -> BindingsMeta {
    BindingsMeta::new()
        .declare(db::BINDING, Vec::<String>::new())
        .declare(profile::BINDING, [db::BINDING])
}

pub fn page(title: &str, body: &str) -> String {
    format!("<!doctype html>\n<html><head><title>{title}</title></head><body>{body}</body></html>")
}

/// Decode an `application/x-www-form-urlencoded` body.
pub async fn read_form(request: Request<Body>) -> Result<HashMap<String, String>, HandlerError> {
    let bytes = axum::body::to_bytes(request.into_body(), MAX_FORM_BYTES)
        .await
        .map_err(|e| HandlerError::failed(format!("cannot read form body: {e}")))?;
    Ok(url::form_urlencoded::parse(&bytes).into_owned().collect())
}
