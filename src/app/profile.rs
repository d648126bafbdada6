//! The profile page and the per-user profile durable object.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{Method, Request, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use edge_router::context::{self, Environment, RequestContext};
use edge_router::dispatch::{Precheck, ServerEntry, ServerModule};
use edge_router::durable::{DurableNamespace, DurableObject, DurableState, DurableStub};
use edge_router::HandlerError;
use tokio::sync::RwLock;

use crate::app::db::{self, Database, Profile};
use crate::app::{page, read_form, USER_COOKIE};

pub const BINDING: &str = "PROFILE";

/// Caches one user's profile in front of the database.
pub struct UserProfile {
    user_id: String,
    db: DurableStub<Database>,
    profile: RwLock<Profile>,
}

#[async_trait]
impl DurableObject for UserProfile {}

impl UserProfile {
    async fn load(state: DurableState, env: Environment) -> Result<Self, HandlerError> {
        let user_id = state
            .id()
            .name()
            .ok_or_else(|| HandlerError::failed("profile objects are addressed by user id"))?
            .to_string();
        let namespace = env.durable::<Database>(db::BINDING)?;
        let db = namespace.get(&namespace.id_from_name(""));

        let profile = state
            .block_concurrency_while(|| {
                let user_id = user_id.clone();
                let db = db.clone();
                async move { db.call(|db| async move { db.get_profile(&user_id).await }).await }
            })
            .await?;

        Ok(Self {
            user_id,
            db,
            profile: RwLock::new(profile),
        })
    }

    pub async fn get_profile(&self) -> Profile {
        self.profile.read().await.clone()
    }

    pub async fn update_profile(&self, profile: Profile) -> Result<Profile, HandlerError> {
        let user_id = self.user_id.clone();
        let saved = self
            .db
            .call(|db| async move { db.persist_profile(&user_id, profile).await })
            .await?;
        *self.profile.write().await = saved.clone();
        Ok(saved)
    }
}

pub fn namespace() -> DurableNamespace<UserProfile> {
    DurableNamespace::new(BINDING, [db::BINDING], UserProfile::load)
}

/// The profile stub of the signed-in user.
pub fn current_user_profile(ctx: &RequestContext) -> Result<Option<DurableStub<UserProfile>>, HandlerError> {
    let Some(user_id) = ctx.cookies()?.get_signed(USER_COOKIE) else {
        return Ok(None);
    };
    let profiles = ctx.env().durable::<UserProfile>(BINDING)?;
    Ok(Some(profiles.get(&profiles.id_from_name(&user_id))))
}

/// Sends visitors without a session back to the login page.
pub struct RequireUser;

#[async_trait]
impl Precheck for RequireUser {
    async fn check(&self, _request: &Parts) -> Result<Option<Response>, HandlerError> {
        if context::cookies()?.get_signed(USER_COOKIE).is_none() {
            return Err(context::redirect("/"));
        }
        Ok(None)
    }
}

pub struct ProfilePageModule;

impl ServerModule for ProfilePageModule {
    fn dependencies(&self) -> &[&str] {
        &[BINDING]
    }

    fn construct(&self, ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        let profile = current_user_profile(ctx)?.ok_or_else(|| context::redirect("/"))?;
        Ok(Box::new(ProfilePage { profile }))
    }
}

struct ProfilePage {
    profile: DurableStub<UserProfile>,
}

#[async_trait]
impl ServerEntry for ProfilePage {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, HandlerError> {
        if request.method() == Method::POST {
            let form = read_form(request).await?;
            let Some(display_name) = form.get("displayName").filter(|v| !v.trim().is_empty()) else {
                let profile = self.profile.call(|p| async move { Ok(p.get_profile().await) }).await?;
                return Ok((StatusCode::BAD_REQUEST, Html(form_page(&profile, Some("Invalid profile")))).into_response());
            };
            let update = Profile {
                display_name: display_name.clone(),
            };
            self.profile
                .call(|p| async move { p.update_profile(update).await })
                .await?;
            return Err(context::redirect("/profile"));
        }

        let profile = self.profile.call(|p| async move { Ok(p.get_profile().await) }).await?;
        Ok(Html(form_page(&profile, None)).into_response())
    }
}

fn form_page(profile: &Profile, message: Option<&str>) -> String {
    let message = message.map(|m| format!("<p>{m}</p>")).unwrap_or_default();
    page(
        "Profile",
        &format!(
            r#"<form method="post">
  <label>Display Name<br><input required type="text" name="displayName" value="{}"></label><br>
  <button type="submit">Save</button>
  {message}
</form>"#,
            escape(&profile.display_name)
        ),
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
