//! Request cookie accessor.
//!
//! # Responsibilities
//! - Parse the incoming `Cookie` header
//! - Read/write plain and signed cookie values during a request
//! - Emit `Set-Cookie` headers for every mutation, exactly once
//!
//! # Design Decisions
//! - Signing and verification are delegated to the `cookie` crate
//! - Several secrets may be configured: the first signs, any verifies
//! - Secrets of any length are stretched to a signing key with SHA-512

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::response::Response;
use cookie::{Cookie, CookieJar, Key, SameSite};
use sha2::{Digest, Sha512};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CookieError {
    /// `set_signed` was called but no signing secret is configured.
    #[error("cannot sign cookie `{0}`: no cookie secret is configured")]
    NoSigningKey(String),
}

struct CookieState {
    jar: CookieJar,
    keys: Vec<Key>,
}

/// Shared accessor over one request's cookies.
#[derive(Clone)]
pub struct Cookies {
    state: Arc<Mutex<CookieState>>,
}

impl Cookies {
    /// Parse a `Cookie` header. Malformed pairs are skipped.
    pub fn parse<S: AsRef<str>>(header: Option<&str>, secrets: &[S]) -> Self {
        let mut jar = CookieJar::new();
        if let Some(header) = header {
            for cookie in Cookie::split_parse(header.to_string()).flatten() {
                jar.add_original(cookie);
            }
        }

        let keys = secrets
            .iter()
            .map(|secret| Key::from(Sha512::digest(secret.as_ref().as_bytes()).as_slice()))
            .collect();

        Self {
            state: Arc::new(Mutex::new(CookieState { jar, keys })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CookieState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read an unsigned cookie value.
    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().jar.get(name).map(|c| c.value().to_string())
    }

    /// Read and verify a signed cookie value. Returns `None` when the
    /// cookie is missing or no configured secret verifies it.
    pub fn get_signed(&self, name: &str) -> Option<String> {
        let state = self.lock();
        state
            .keys
            .iter()
            .find_map(|key| state.jar.signed(key).get(name))
            .map(|c| c.value().to_string())
    }

    pub fn set(&self, name: &str, value: &str) {
        self.lock().jar.add(build(name, value));
    }

    pub fn set_signed(&self, name: &str, value: &str) -> Result<(), CookieError> {
        let mut state = self.lock();
        let CookieState { jar, keys } = &mut *state;
        let key = keys
            .first()
            .ok_or_else(|| CookieError::NoSigningKey(name.to_string()))?;
        jar.signed_mut(key).add(build(name, value));
        Ok(())
    }

    /// Remove a cookie, signed or not.
    pub fn unset(&self, name: &str) {
        self.lock()
            .jar
            .remove(Cookie::build((name.to_string(), "")).path("/"));
    }

    /// `Set-Cookie` values for every change made so far.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.lock().jar.delta().map(|c| c.to_string()).collect()
    }
}

impl std::fmt::Debug for Cookies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Cookies")
            .field("names", &state.jar.iter().map(|c| c.name().to_string()).collect::<Vec<_>>())
            .field("keys", &state.keys.len())
            .finish()
    }
}

fn build(name: &str, value: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), value.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Owns the cookies built for a request by the dispatcher.
///
/// [`CookieHandler::send`] consumes the handler, so mutations reach the
/// response exactly once.
pub struct CookieHandler {
    cookies: Cookies,
}

impl CookieHandler {
    pub fn new<S: AsRef<str>>(header: Option<&str>, secrets: &[S]) -> Self {
        Self {
            cookies: Cookies::parse(header, secrets),
        }
    }

    pub fn cookies(&self) -> Cookies {
        self.cookies.clone()
    }

    /// Append a `Set-Cookie` header per mutation.
    pub fn send(self, mut response: Response) -> Response {
        for value in self.cookies.set_cookie_headers() {
            match HeaderValue::from_str(&value) {
                Ok(header) => {
                    response.headers_mut().append(SET_COOKIE, header);
                }
                Err(e) => tracing::warn!(error = %e, "Dropping unencodable Set-Cookie header"),
            }
        }
        response
    }
}
