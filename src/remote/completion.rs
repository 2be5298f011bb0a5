use async_trait::async_trait;
use log::debug;
use reqwest::{ Client as HttpClient, header::{ HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use url::Url;

use super::{ ClientError, CompletionClient };
use crate::models::chat::WireMessage;

/// Client for the remote send-message function.
pub struct HttpCompletionClient {
    http: HttpClient,
    url: Url,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [WireMessage],
    model: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    message: Option<String>,
    error: Option<String>,
}

impl HttpCompletionClient {
    pub fn new(http: HttpClient, url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            url: Url::parse(url)?,
        })
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, messages: &[WireMessage], model: &str) -> Result<String, ClientError> {
        let body = CompletionRequest { messages, model };
        debug!("Posting {} messages to {} (model {})", messages.len(), self.url, model);

        let resp = self.http
            .post(self.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&body)
            .send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        // A body that is not JSON counts as a failed call, not an API answer.
        let parsed: CompletionResponse = serde_json::from_str(&text)?;

        match parsed.message.filter(|m| !m.is_empty()) {
            Some(message) if status.is_success() => Ok(message),
            _ =>
                Err(ClientError::Api {
                    status: status.as_u16(),
                    message: parsed.error.filter(|e| !e.trim().is_empty()),
                }),
        }
    }
}
