//! JSON endpoints.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use edge_router::context::RequestContext;
use edge_router::dispatch::{ServerEntry, ServerModule};
use edge_router::durable::DurableStub;
use edge_router::HandlerError;
use serde_json::json;

use crate::app::db::{self, Database};
use crate::app::profile::{self, current_user_profile, UserProfile};

pub struct PingModule;

impl ServerModule for PingModule {
    fn construct(&self, _ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        Ok(Box::new(Ping))
    }
}

struct Ping;

#[async_trait]
impl ServerEntry for Ping {
    async fn fetch(&self, _request: Request<Body>) -> Result<Response, HandlerError> {
        Ok(Json("pong").into_response())
    }
}

pub struct StatusModule;

impl ServerModule for StatusModule {
    fn dependencies(&self) -> &[&str] {
        &[db::BINDING]
    }

    fn construct(&self, _ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        Ok(Box::new(Status { db: db::stub()? }))
    }
}

struct Status {
    db: DurableStub<Database>,
}

#[async_trait]
impl ServerEntry for Status {
    async fn fetch(&self, _request: Request<Body>) -> Result<Response, HandlerError> {
        let db = match self.db.call(|db| async move { Ok(db.status()) }).await {
            Ok(status) => status.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Database status check failed");
                "failed to get status".to_string()
            }
        };
        let status = if db == "ok" {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Ok((status, Json(json!({ "db": db }))).into_response())
    }
}

pub struct ProfileApiModule;

impl ServerModule for ProfileApiModule {
    fn dependencies(&self) -> &[&str] {
        &[profile::BINDING]
    }

    fn construct(&self, ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        Ok(Box::new(ProfileApi {
            profile: current_user_profile(ctx)?,
        }))
    }
}

struct ProfileApi {
    profile: Option<DurableStub<UserProfile>>,
}

#[async_trait]
impl ServerEntry for ProfileApi {
    async fn fetch(&self, _request: Request<Body>) -> Result<Response, HandlerError> {
        let Some(profile) = &self.profile else {
            return Ok((StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response());
        };
        let profile = profile.call(|p| async move { Ok(p.get_profile().await) }).await?;
        Ok(Json(profile).into_response())
    }
}
