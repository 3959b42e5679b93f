use crate::api::models::{ChatRequest, HealthResponse, HistoryResponse};
use crate::error::{ChatError, Result};
use crate::models::Message;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// HTTP side of the backend: one-shot chunked turns plus history endpoints.
#[derive(Clone)]
pub struct FallbackClient {
    http: reqwest::Client,
    base_url: String,
    chunk_timeout: Duration,
}

impl FallbackClient {
    pub fn new(base_url: &str, chunk_timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chunk_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn chunk_timeout(&self) -> Duration {
        self.chunk_timeout
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /chat`; the caller consumes the chunked body.
    pub async fn start_turn(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        debug!(user_id = %request.user_id, "starting turn over HTTP");
        let response = self
            .http
            .post(self.url("/chat"))
            .header(ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        ensure_success(response).await
    }

    /// `GET /chat/{user_id}/history`
    pub async fn fetch_history(&self, user_id: &str) -> Result<Vec<Message>> {
        let response = self
            .http
            .get(self.url(&format!("/chat/{}/history", user_id)))
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let history: HistoryResponse = response.json().await?;
        Ok(history.messages.into_iter().map(Message::from).collect())
    }

    /// `DELETE /chat/{user_id}`
    pub async fn clear_history(&self, user_id: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/chat/{}", user_id)))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.http.get(self.url("/health")).send().await?;
        let response = ensure_success(response).await?;
        Ok(response.json().await?)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ChatError::ApiError { status, message })
}
