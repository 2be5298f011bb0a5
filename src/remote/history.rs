use async_trait::async_trait;
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, Response };
use serde::{ Deserialize, Serialize };
use serde::de::DeserializeOwned;
use url::Url;

use super::{ parse_remote_instant, status_error, ClientError, HistoryClient };
use crate::models::chat::{ ChatHistorySummary, ChatId, Message, MessageId, Role, WireMessage };

/// Client for the three remote history functions (list, fetch, save).
pub struct HttpHistoryClient {
    http: HttpClient,
    list_url: Url,
    fetch_url: Url,
    save_url: Url,
}

#[derive(Deserialize)]
struct ChatListResponse {
    #[serde(default)]
    chats: Vec<StoredSummary>,
}

#[derive(Deserialize)]
struct StoredSummary {
    id: ChatId,
    #[serde(default)]
    title: String,
    #[serde(rename = "lastMessage", default)]
    last_message: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    messages: Vec<StoredMessage>,
}

#[derive(Deserialize)]
struct StoredMessage {
    id: MessageId,
    role: String,
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    title: &'a str,
    messages: &'a [WireMessage],
}

#[derive(Deserialize)]
struct SaveResponse {
    chat_id: ChatId,
}

impl HttpHistoryClient {
    pub fn new(
        http: HttpClient,
        list_url: &str,
        fetch_url: &str,
        save_url: &str
    ) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            list_url: Url::parse(list_url)?,
            fetch_url: Url::parse(fetch_url)?,
            save_url: Url::parse(save_url)?,
        })
    }

    async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

impl From<StoredSummary> for ChatHistorySummary {
    fn from(stored: StoredSummary) -> Self {
        ChatHistorySummary {
            date: parse_remote_instant(stored.date.as_deref()),
            id: stored.id,
            title: stored.title,
            last_message: stored.last_message.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl HistoryClient for HttpHistoryClient {
    async fn list_chats(&self) -> Result<Vec<ChatHistorySummary>, ClientError> {
        let resp = self.http.get(self.list_url.clone()).send().await?;
        let body: ChatListResponse = Self::read_json(resp).await?;
        debug!("History list returned {} chats", body.chats.len());
        Ok(body.chats.into_iter().map(ChatHistorySummary::from).collect())
    }

    async fn fetch_chat(&self, id: &ChatId) -> Result<Vec<Message>, ClientError> {
        let mut url = self.fetch_url.clone();
        url.query_pairs_mut().append_pair("chat_id", id.as_str());
        let resp = self.http.get(url).send().await?;
        let body: ChatResponse = Self::read_json(resp).await?;

        let messages = body.messages
            .into_iter()
            .filter_map(|stored| {
                match stored.role.parse::<Role>() {
                    Ok(role) =>
                        Some(Message {
                            id: stored.id,
                            content: stored.content,
                            role,
                            timestamp: parse_remote_instant(stored.timestamp.as_deref()),
                        }),
                    Err(e) => {
                        warn!("Skipping message {} of chat {}: {}", stored.id, id, e);
                        None
                    }
                }
            })
            .collect();
        Ok(messages)
    }

    async fn save_chat(&self, title: &str, messages: &[WireMessage]) -> Result<ChatId, ClientError> {
        let resp = self.http
            .post(self.save_url.clone())
            .json(&(SaveRequest { title, messages }))
            .send().await?;
        let body: SaveResponse = Self::read_json(resp).await?;
        Ok(body.chat_id)
    }
}
