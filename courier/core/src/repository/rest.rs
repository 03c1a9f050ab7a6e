//! REST repository
//!
//! Talks to a PostgREST table API (`/rest/v1/<table>`) and a GoTrue auth API
//! (`/auth/v1/user`), the layout used by hosted Postgres backends.
//!
//! Every request carries the project's `apikey` header. Requests are
//! authorized with the user's access token when one is configured, and with
//! the API key otherwise.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{AuthSession, ChatRepository, RepositoryError, RepositoryResult, Role};
use crate::config::BackendSettings;
use crate::conversation::Conversation;
use crate::messages::{ConversationId, Message, NewMessage, UserId};

const REST_PATH: &str = "rest/v1";
const AUTH_USER_PATH: &str = "auth/v1/user";

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

/// [`ChatRepository`] backed by PostgREST and GoTrue
#[derive(Clone)]
pub struct RestRepository {
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

impl RestRepository {
    /// Create a repository for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &BackendSettings) -> RepositoryResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            base_url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            access_token: settings.access_token.clone(),
            http_client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{REST_PATH}/{table}", self.base_url)
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.api_key)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.http_client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(self.bearer())
    }

    /// Ask PostgREST to return the written rows
    fn returning(builder: RequestBuilder) -> RequestBuilder {
        builder.header("Prefer", "return=representation")
    }

    async fn check(response: Response) -> RepositoryResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(RepositoryError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn fetch<T: DeserializeOwned>(builder: RequestBuilder) -> RepositoryResult<T> {
        let response = Self::check(builder.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))
    }

    /// Writes return a one-row array
    async fn fetch_one<T: DeserializeOwned>(
        builder: RequestBuilder,
        what: &str,
    ) -> RepositoryResult<T> {
        let mut rows: Vec<T> = Self::fetch(builder).await?;
        if rows.is_empty() {
            return Err(RepositoryError::Decode(format!("no {what} returned")));
        }
        Ok(rows.swap_remove(0))
    }
}

#[async_trait]
impl ChatRepository for RestRepository {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn current_session(&self) -> RepositoryResult<Option<AuthSession>> {
        let Some(token) = self.access_token.clone() else {
            return Ok(None);
        };

        let response = self
            .http_client
            .get(format!("{}/{AUTH_USER_PATH}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(&token)
            .send()
            .await?;

        if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            tracing::debug!(status = %response.status(), "Access token rejected");
            return Ok(None);
        }

        let user: AuthUser = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        Ok(Some(AuthSession::new(UserId::new(user.id), token)))
    }

    async fn has_role(&self, user: &UserId, role: Role) -> RepositoryResult<bool> {
        let builder = self.request(Method::GET, "user_roles").query(&[
            ("select", "role".to_string()),
            ("user_id", format!("eq.{user}")),
            ("role", format!("eq.{}", role.as_str())),
        ]);
        let rows: Vec<serde_json::Value> = Self::fetch(builder).await?;
        Ok(!rows.is_empty())
    }

    async fn list_conversations(&self) -> RepositoryResult<Vec<Conversation>> {
        let builder = self
            .request(Method::GET, "conversations")
            .query(&[("select", "id,title,updated_at"), ("order", "updated_at.desc")]);
        Self::fetch(builder).await
    }

    async fn create_conversation(
        &self,
        user: &UserId,
        title: &str,
    ) -> RepositoryResult<Conversation> {
        let body = serde_json::json!({ "user_id": user, "title": title });
        let builder = Self::returning(self.request(Method::POST, "conversations"))
            .query(&[("select", "id,title,updated_at")])
            .json(&body);
        Self::fetch_one(builder, "conversation").await
    }

    async fn update_conversation_title(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> RepositoryResult<()> {
        let builder = self
            .request(Method::PATCH, "conversations")
            .query(&[("id", format!("eq.{id}"))])
            .json(&serde_json::json!({ "title": title }));
        Self::check(builder.send().await?).await?;
        Ok(())
    }

    async fn list_messages(&self, conversation: &ConversationId) -> RepositoryResult<Vec<Message>> {
        let builder = self.request(Method::GET, "messages").query(&[
            ("select", "id,role,content".to_string()),
            ("conversation_id", format!("eq.{conversation}")),
            ("order", "created_at.asc".to_string()),
        ]);
        Self::fetch(builder).await
    }

    async fn insert_message(&self, message: &NewMessage) -> RepositoryResult<Message> {
        let builder = Self::returning(self.request(Method::POST, "messages"))
            .query(&[("select", "id,role,content")])
            .json(message);
        Self::fetch_one(builder, "message").await
    }
}
