//! URL pattern compilation and execution.
//!
//! # Responsibilities
//! - Join parent/child pathname fragments into absolute pathnames
//! - Inherit protocol, hostname, port and base URL from the nearest ancestor
//! - Compile an effective pattern and execute it against request URLs
//!
//! # Design Decisions
//! - Pure functions: compiling never touches the route node it came from
//! - `search` is never inherited; it only constrains the node that declares it
//! - Hostname matching is case-insensitive, pathname matching is case-sensitive
//! - Compiled patterns are memoized per router in a [`PatternCache`]

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors raised while compiling a pattern.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternError {
    /// The base URL could not be parsed.
    #[error("invalid base URL `{0}`")]
    BaseUrl(String),

    /// The port is neither numeric nor `*`.
    #[error("invalid port pattern `{0}`")]
    Port(String),

    /// A `:` segment without a parameter name.
    #[error("empty parameter name in pathname `{0}`")]
    EmptyParam(String),

    /// A `*` segment that is not the final segment.
    #[error("wildcard must be the last segment of pathname `{0}`")]
    WildcardNotLast(String),
}

/// A URL pattern fragment as declared on a route node.
///
/// Every field is optional. Unset fields are filled from the parent's
/// effective pattern by [`PatternInit::inherit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct PatternInit {
    pub pathname: Option<String>,
    pub search: Option<String>,
    pub hostname: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<String>,
    pub base_url: Option<String>,
}

impl PatternInit {
    /// A pattern constraining only the pathname.
    pub fn pathname(pathname: impl Into<String>) -> Self {
        Self {
            pathname: Some(pathname.into()),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Compute the effective pattern of a node.
    ///
    /// A node without its own pattern behaves as `{ pathname: "/" }`, so its
    /// effective pathname is the parent's.
    pub fn inherit(own: Option<&PatternInit>, parent: Option<&PatternInit>) -> PatternInit {
        let root = PatternInit::pathname("/");
        let own = own.unwrap_or(&root);

        PatternInit {
            base_url: inherited(&own.base_url, parent.map(|p| &p.base_url)),
            hostname: inherited(&own.hostname, parent.map(|p| &p.hostname)),
            pathname: Some(join_pathname(
                parent.and_then(|p| p.pathname.as_deref()),
                own.pathname.as_deref(),
            )),
            protocol: inherited(&own.protocol, parent.map(|p| &p.protocol)),
            search: own.search.clone(),
            port: inherited(&own.port, parent.map(|p| &p.port)),
        }
    }
}

fn inherited(own: &Option<String>, parent: Option<&Option<String>>) -> Option<String> {
    own.clone().or_else(|| parent.cloned().flatten())
}

/// Join two pathname fragments into one absolute pathname.
///
/// Empty segments are dropped, so duplicate, leading and trailing slashes
/// never survive: `join_pathname(Some("/a/"), Some("//b"))` is `/a/b`.
pub fn join_pathname(parent: Option<&str>, child: Option<&str>) -> String {
    let segments: Vec<&str> = [parent, child]
        .into_iter()
        .flatten()
        .flat_map(|fragment| fragment.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Result of executing a pattern against a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMatch {
    /// The pathname that was matched.
    pub pathname: String,
    /// Named parameters captured from the pathname. A trailing `*` is
    /// captured under `"0"`.
    pub params: HashMap<String, String>,
}

impl PatternMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Optional(String),
    Wildcard,
}

/// An effective pattern ready to be executed.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    segments: Vec<Segment>,
    hostname: Option<String>,
    search: Option<String>,
    protocol: Option<String>,
    port: Option<String>,
}

impl CompiledPattern {
    /// Compile an effective pattern. Fields still unset after inheritance
    /// fall back to the components of `base_url`.
    pub fn compile(init: &PatternInit) -> Result<Self, PatternError> {
        let base = init
            .base_url
            .as_deref()
            .map(|raw| Url::parse(raw).map_err(|_| PatternError::BaseUrl(raw.to_string())))
            .transpose()?;

        let protocol = init
            .protocol
            .clone()
            .or_else(|| base.as_ref().map(|b| b.scheme().to_string()))
            .map(|p| p.trim_end_matches(':').to_ascii_lowercase());
        let hostname = init
            .hostname
            .clone()
            .or_else(|| base.as_ref().and_then(|b| b.host_str().map(str::to_string)))
            .map(|h| h.to_ascii_lowercase());
        let port = init
            .port
            .clone()
            .or_else(|| base.as_ref().and_then(|b| b.port().map(|p| p.to_string())));

        if let Some(port) = &port {
            if port != "*" && port.parse::<u16>().is_err() {
                return Err(PatternError::Port(port.clone()));
            }
        }

        let pathname = init.pathname.as_deref().unwrap_or("/");
        let segments = compile_pathname(pathname)?;

        Ok(Self {
            segments,
            hostname: hostname.filter(|h| h != "*"),
            search: init.search.clone().map(|s| s.trim_start_matches('?').to_string()),
            protocol: protocol.filter(|p| p != "*"),
            port: port.filter(|p| p != "*"),
        })
    }

    /// Execute the pattern against a URL.
    pub fn exec(&self, url: &Url) -> Option<PatternMatch> {
        if let Some(protocol) = &self.protocol {
            if url.scheme() != protocol {
                return None;
            }
        }

        if let Some(hostname) = &self.hostname {
            let host = url.host_str()?.to_ascii_lowercase();
            if !glob_match(hostname, &host) {
                return None;
            }
        }

        if let Some(port) = &self.port {
            let actual = url.port_or_known_default().map(|p| p.to_string());
            if actual.as_deref() != Some(port.as_str()) {
                return None;
            }
        }

        if let Some(search) = &self.search {
            if !glob_match(search, url.query().unwrap_or("")) {
                return None;
            }
        }

        let path = url.path();
        let input: Vec<&str> = match path.strip_prefix('/') {
            Some("") | None => Vec::new(),
            Some(rest) => rest.split('/').collect(),
        };

        let mut params = HashMap::new();
        if match_segments(&self.segments, &input, &mut params) {
            Some(PatternMatch {
                pathname: path.to_string(),
                params,
            })
        } else {
            None
        }
    }
}

fn compile_pathname(pathname: &str) -> Result<Vec<Segment>, PatternError> {
    let raw: Vec<&str> = pathname.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());

    for (i, segment) in raw.iter().enumerate() {
        let compiled = if *segment == "*" {
            if i + 1 != raw.len() {
                return Err(PatternError::WildcardNotLast(pathname.to_string()));
            }
            Segment::Wildcard
        } else if let Some(name) = segment.strip_prefix(':') {
            match name.strip_suffix('?') {
                Some("") => return Err(PatternError::EmptyParam(pathname.to_string())),
                Some(name) => Segment::Optional(name.to_string()),
                None if name.is_empty() => {
                    return Err(PatternError::EmptyParam(pathname.to_string()))
                }
                None => Segment::Param(name.to_string()),
            }
        } else {
            Segment::Literal(segment.to_string())
        };
        segments.push(compiled);
    }

    Ok(segments)
}

fn match_segments(
    pattern: &[Segment],
    input: &[&str],
    params: &mut HashMap<String, String>,
) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return input.is_empty();
    };

    match head {
        Segment::Wildcard => {
            params.insert("0".to_string(), input.join("/"));
            true
        }
        Segment::Literal(literal) => match input.split_first() {
            Some((segment, tail)) if segment == literal => match_segments(rest, tail, params),
            _ => false,
        },
        Segment::Param(name) => capture(name, rest, input, params),
        Segment::Optional(name) => {
            capture(name, rest, input, params) || match_segments(rest, input, params)
        }
    }
}

fn capture(
    name: &str,
    rest: &[Segment],
    input: &[&str],
    params: &mut HashMap<String, String>,
) -> bool {
    match input.split_first() {
        Some((segment, tail)) if !segment.is_empty() => {
            params.insert(name.to_string(), segment.to_string());
            if match_segments(rest, tail, params) {
                true
            } else {
                params.remove(name);
                false
            }
        }
        _ => false,
    }
}

/// Match `input` against a pattern where `*` matches any run of characters.
fn glob_match(pattern: &str, input: &str) -> bool {
    let pattern = pattern.as_bytes();
    let input = input.as_bytes();
    let (mut p, mut i) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while i < input.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, i));
            p += 1;
        } else if p < pattern.len() && pattern[p] == input[i] {
            p += 1;
            i += 1;
        } else if let Some((star, consumed)) = backtrack {
            p = star + 1;
            i = consumed + 1;
            backtrack = Some((star, consumed + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Per-router memo of compiled patterns, keyed by effective pattern.
///
/// Route trees are static, so each effective pattern is compiled once on
/// first use and shared by every later request.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: DashMap<PatternInit, Arc<CompiledPattern>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, init: &PatternInit) -> Result<Arc<CompiledPattern>, PatternError> {
        if let Some(hit) = self.compiled.get(init) {
            return Ok(hit.clone());
        }
        let compiled = Arc::new(CompiledPattern::compile(init)?);
        self.compiled.insert(init.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Number of distinct patterns compiled so far.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}
