//! Declarative views and the HTML renderer that lays them out.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::{Html, IntoResponse, Response};
use edge_router::dispatch::{Renderer, View};
use edge_router::HandlerError;

use crate::app::page;

/// The layout around every page.
pub struct GlobalShell;

impl View for GlobalShell {
    fn name(&self) -> &str {
        "global-shell"
    }
}

pub struct AboutPage;

impl View for AboutPage {
    fn name(&self) -> &str {
        "about"
    }
}

/// Nests each view inside the previous one.
pub struct HtmlRenderer;

#[async_trait]
impl Renderer for HtmlRenderer {
    async fn render(&self, request: Request<Body>, views: Vec<Arc<dyn View>>) -> Result<Response, HandlerError> {
        let title = views.last().map(|v| v.name().to_string()).unwrap_or_default();
        let body = views.iter().rev().fold(String::new(), |inner, view| {
            format!(r#"<div data-view="{}">{inner}</div>"#, view.name())
        });
        tracing::debug!(path = %request.uri().path(), views = views.len(), "Rendering views");
        Ok(Html(page(&title, &body)).into_response())
    }
}
