//! The login page: renders the form and handles its submission.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use edge_router::context::{self, RequestContext};
use edge_router::dispatch::{ServerEntry, ServerModule};
use edge_router::durable::DurableStub;
use edge_router::HandlerError;

use crate::app::db::{self, Database, LoginInput};
use crate::app::{page, read_form, USER_COOKIE};

pub struct LoginModule;

impl ServerModule for LoginModule {
    fn dependencies(&self) -> &[&str] {
        &[db::BINDING]
    }

    fn construct(&self, _ctx: &RequestContext) -> Result<Box<dyn ServerEntry>, HandlerError> {
        Ok(Box::new(Login { db: db::stub()? }))
    }
}

struct Login {
    db: DurableStub<Database>,
}

#[async_trait]
impl ServerEntry for Login {
    async fn fetch(&self, request: Request<Body>) -> Result<Response, HandlerError> {
        if request.method() == Method::POST {
            return self.login(request).await;
        }
        if context::cookies()?.get_signed(USER_COOKIE).is_some() {
            return Err(context::redirect("/profile"));
        }
        Ok(Html(form_page(None)).into_response())
    }
}

impl Login {
    async fn login(&self, request: Request<Body>) -> Result<Response, HandlerError> {
        let form = read_form(request).await?;
        let Some(input) = validate(&form) else {
            return Ok(rejected());
        };

        let user = self
            .db
            .call(|db| async move { Ok(db.login_user(&input)) })
            .await?;
        let Some(user) = user else {
            return Ok(rejected());
        };
        context::cookies()?.set_signed(USER_COOKIE, &user.id)?;
        Err(context::redirect("/profile"))
    }
}

fn rejected() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(form_page(Some("Invalid email or password."))),
    )
        .into_response()
}

fn validate(form: &std::collections::HashMap<String, String>) -> Option<LoginInput> {
    let email = form.get("email").filter(|v| !v.is_empty())?;
    let password = form.get("password").filter(|v| !v.is_empty())?;
    Some(LoginInput {
        email: email.clone(),
        password: password.clone(),
    })
}

fn form_page(message: Option<&str>) -> String {
    let message = message.map(|m| format!("<p>{m}</p>")).unwrap_or_default();
    page(
        "Login",
        &format!(
            r#"<form method="post">
  <label>Email<br><input required type="email" name="email"></label>
  <label>Password<br><input required type="password" name="password"></label><br>
  <button type="submit">Login</button>
  {message}
</form>"#
        ),
    )
}
