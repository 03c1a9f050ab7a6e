//! HTTP chat endpoint
//!
//! POSTs the request as JSON with the user's bearer token and hands back the
//! body as a byte stream. No total timeout is set on the client: replies can
//! stream for longer than any fixed request budget.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{ByteStream, ChatEndpoint, ChatRequest};
use crate::config::BackendSettings;
use crate::error::ChatError;

/// [`ChatEndpoint`] over HTTPS
#[derive(Clone)]
pub struct HttpChatEndpoint {
    url: String,
    api_key: String,
    access_token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpChatEndpoint {
    /// Create an endpoint at `{settings.url}/{function_path}`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &BackendSettings, function_path: &str) -> Result<Self, ChatError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.request_timeout.min(Duration::from_secs(30)))
            .build()?;

        Ok(Self {
            url: format!(
                "{}/{}",
                settings.url.trim_end_matches('/'),
                function_path.trim_start_matches('/')
            ),
            api_key: settings.api_key.clone(),
            access_token: settings.access_token.clone(),
            http_client,
        })
    }

    /// Full URL of the function
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn build(&self, request: &ChatRequest) -> reqwest::RequestBuilder {
        let token = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.http_client
            .post(&self.url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .json(request)
    }
}

#[async_trait]
impl ChatEndpoint for HttpChatEndpoint {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ChatError> {
        tracing::debug!(
            url = %self.url,
            conversation = %request.conversation_id,
            turns = request.messages.len(),
            "Opening chat stream"
        );

        let response = self.build(request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, "Chat endpoint rejected request");
            return Err(ChatError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from));
        Ok(Box::pin(stream))
    }
}
