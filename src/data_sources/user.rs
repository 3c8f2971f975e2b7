//! `snyk_user` data source

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::client::SnykApi;
use crate::error::ProviderError;
use crate::resource::{decode, encode, non_empty, DataSource};
use crate::schema::{Attribute, Schema};

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserModel {
    email: Option<String>,
    id: Option<String>,
    name: Option<String>,
    username: Option<String>,
}

/// Looks up a user, the token owner unless an ID is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserDataSource;

#[async_trait]
impl DataSource for UserDataSource {
    fn type_name(&self) -> &'static str {
        "snyk_user"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description(
                "The user data source provides information about an existing Snyk user. A user in Snyk is a member \
                 of an Organization, that have access to Projects.",
            )
            .with_attribute("email", Attribute::computed_string().with_description("The email of the user."))
            .with_attribute(
                "id",
                Attribute::optional_computed_string()
                    .with_description("The ID of the user. Defaults to the user owning the API token."),
            )
            .with_attribute("name", Attribute::computed_string().with_description("The name of the user."))
            .with_attribute(
                "username",
                Attribute::computed_string().with_description("The username of the user."),
            )
    }

    async fn read(&self, client: &dyn SnykApi, config: Value) -> Result<Value, ProviderError> {
        let data: UserModel = decode(config)?;

        let user = match non_empty(&data.id) {
            Some(user_id) => {
                trace!(user_id = %user_id, "Getting user");
                client.get_user(user_id).await
            },
            None => {
                trace!("Getting self user");
                client.get_self_user().await
            },
        }
        .map_err(|e| ProviderError::api("Unable to get user", e))?;
        trace!(user_id = %user.id, "Got user");

        encode(&UserModel {
            email: Some(user.email),
            id: Some(user.id),
            name: Some(user.name),
            username: Some(user.username),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::User;
    use crate::testing::{assert_error_summary, MemorySnykApi};
    use serde_json::json;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            name: format!("User {}", id),
            username: format!("user-{}", id),
            email: format!("{}@example.com", id),
        }
    }

    #[tokio::test]
    async fn test_self_user() {
        let api = MemorySnykApi::new();
        api.insert_user(user("u1"), true);
        api.insert_user(user("u2"), false);

        let state = UserDataSource.read(&api, json!({"id": null})).await.unwrap();
        assert_eq!(
            state,
            json!({"email": "u1@example.com", "id": "u1", "name": "User u1", "username": "user-u1"})
        );
        assert_eq!(api.calls(), vec!["get_self_user"]);
    }

    #[tokio::test]
    async fn test_user_by_id() {
        let api = MemorySnykApi::new();
        api.insert_user(user("u1"), true);
        api.insert_user(user("u2"), false);

        let state = UserDataSource.read(&api, json!({"id": "u2"})).await.unwrap();
        assert_eq!(state["username"], "user-u2");

        let err = UserDataSource.read(&api, json!({"id": "u9"})).await.unwrap_err();
        assert_error_summary(err, "Unable to get user");
    }

    #[tokio::test]
    async fn test_self_user_unauthorized() {
        let api = MemorySnykApi::new();
        let err = UserDataSource.read(&api, json!({})).await.unwrap_err();
        assert_error_summary(err, "Unable to get user");
    }
}
