//! Database durable object: the single owner of persisted application data.

use async_trait::async_trait;
use edge_router::context;
use edge_router::durable::{DurableNamespace, DurableObject, DurableState, DurableStub};
use edge_router::HandlerError;
use serde::{Deserialize, Serialize};

pub const BINDING: &str = "DB";

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
}

pub struct Database {
    state: DurableState,
}

#[async_trait]
impl DurableObject for Database {}

impl Database {
    pub fn status(&self) -> &'static str {
        "ok"
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Profile, HandlerError> {
        let stored = self
            .state
            .storage()
            .get_as::<Profile>(&profile_key(user_id))
            .await?;
        Ok(stored.unwrap_or_else(|| Profile {
            display_name: "John Doe".to_string(),
        }))
    }

    pub async fn persist_profile(&self, user_id: &str, profile: Profile) -> Result<Profile, HandlerError> {
        self.state
            .storage()
            .put_as(&profile_key(user_id), &profile)
            .await?;
        tracing::debug!(user_id, "Profile persisted");
        Ok(profile)
    }

    // every well-formed login maps to the demo user
    pub fn login_user(&self, input: &LoginInput) -> Option<User> {
        if !input.email.contains('@') || input.password.is_empty() {
            return None;
        }
        tracing::debug!(email = %input.email, "User logged in");
        Some(User {
            id: "123".to_string(),
        })
    }
}

fn profile_key(user_id: &str) -> String {
    format!("profile:{user_id}")
}

pub fn namespace() -> DurableNamespace<Database> {
    DurableNamespace::new(BINDING, Vec::<String>::new(), |state, _env| async move {
        Ok(Database { state })
    })
}

/// The shared database instance, looked up in the current environment.
pub fn stub() -> Result<DurableStub<Database>, HandlerError> {
    let db = context::env()?.durable::<Database>(BINDING)?;
    Ok(db.get(&db.id_from_name("")))
}
