pub mod completion;
pub mod history;

use async_trait::async_trait;
use chrono::{ DateTime, NaiveDateTime, Utc };
use log::warn;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use crate::cli::Args;
use crate::models::chat::{ ChatHistorySummary, ChatId, Message, WireMessage };
use self::completion::HttpCompletionClient;
use self::history::HttpHistoryClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("remote returned status {status}: {}", .message.as_deref().unwrap_or("no error text"))]
    Api {
        status: u16,
        message: Option<String>,
    },
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl ClientError {
    /// True when the remote never produced a usable answer: the call itself
    /// failed or the body was not the JSON we expect.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Decode(_))
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, messages: &[WireMessage], model: &str) -> Result<String, ClientError>;
}

#[async_trait]
pub trait HistoryClient: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<ChatHistorySummary>, ClientError>;

    async fn fetch_chat(&self, id: &ChatId) -> Result<Vec<Message>, ClientError>;

    async fn save_chat(&self, title: &str, messages: &[WireMessage]) -> Result<ChatId, ClientError>;
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub completion_url: String,
    pub history_list_url: String,
    pub history_fetch_url: String,
    pub history_save_url: String,
}

impl From<&Args> for RemoteConfig {
    fn from(args: &Args) -> Self {
        Self {
            completion_url: args.completion_url.clone(),
            history_list_url: args.history_list_url.clone(),
            history_fetch_url: args.history_fetch_url.clone(),
            history_save_url: args.history_save_url.clone(),
        }
    }
}

pub fn new_clients(
    config: &RemoteConfig
) -> Result<(Arc<dyn CompletionClient>, Arc<dyn HistoryClient>), ClientError> {
    let http = reqwest::Client::builder().build()?;
    let completion = HttpCompletionClient::new(http.clone(), &config.completion_url)?;
    let history = HttpHistoryClient::new(
        http,
        &config.history_list_url,
        &config.history_fetch_url,
        &config.history_save_url
    )?;
    Ok((Arc::new(completion), Arc::new(history)))
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Builds the error for a non-2xx answer, keeping the body's `error` text
/// when there is one.
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> ClientError {
    let message = serde_json
        ::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .filter(|m| !m.trim().is_empty());
    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Normalises the instants the history services emit. Offset-less ISO
/// timestamps are taken as UTC; null or garbage becomes the Unix epoch.
pub fn parse_remote_instant(raw: Option<&str>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return DateTime::<Utc>::UNIX_EPOCH;
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return naive.and_utc();
        }
    }
    warn!("Unrecognised remote timestamp '{}', using epoch", raw);
    DateTime::<Utc>::UNIX_EPOCH
}
