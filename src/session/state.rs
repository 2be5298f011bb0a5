use chrono::{ DateTime, Utc };
use serde::Serialize;

use crate::models::chat::{
    ChatHistorySummary,
    ChatId,
    Message,
    MessageId,
    Role,
    Section,
    WireMessage,
};

pub const TITLE_MAX_CHARS: usize = 50;
pub const TITLE_ELLIPSIS: &str = "...";
/// Oldest notices are dropped past this many.
pub const MAX_NOTICES: usize = 5;

/// Chat title from the opening message: at most 50 characters, with an
/// ellipsis when anything was cut.
pub fn derive_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}{}", head, TITLE_ELLIPSIS)
    } else {
        head
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub id: u64,
    pub text: String,
}

/// Everything a renderer needs to draw the page. Mutated only by the owning
/// `SessionController`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionState {
    pub section: Section,
    pub sidebar_open: bool,
    pub messages: Vec<Message>,
    pub input: String,
    pub loading: bool,
    pub history: Vec<ChatHistorySummary>,
    pub current_chat_id: Option<ChatId>,
    pub notices: Vec<Notice>,
    #[serde(skip)]
    last_issued_ms: i64,
    #[serde(skip)]
    next_notice_id: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            section: Section::Home,
            sidebar_open: true,
            messages: Vec::new(),
            input: String::new(),
            loading: false,
            history: Vec::new(),
            current_chat_id: None,
            notices: Vec::new(),
            last_issued_ms: 0,
            next_notice_id: 1,
        }
    }
}

impl SessionState {
    // Ids are millisecond stamps, bumped past the last one handed out.
    fn issue_id(&mut self, floor_ms: i64) -> MessageId {
        let ms = floor_ms.max(self.last_issued_ms + 1);
        self.last_issued_ms = ms;
        MessageId::from_millis(ms)
    }

    /// Appends the user's message and raises the loading flag. Returns the
    /// new message id and the conversation to send, or `None` when the text
    /// is blank or a send is already outstanding.
    pub fn begin_send(
        &mut self,
        text: &str,
        now: DateTime<Utc>
    ) -> Option<(MessageId, Vec<WireMessage>)> {
        if text.trim().is_empty() || self.loading {
            return None;
        }
        let id = self.issue_id(now.timestamp_millis());
        self.messages.push(Message {
            id: id.clone(),
            content: text.to_string(),
            role: Role::User,
            timestamp: now,
        });
        self.input.clear();
        self.loading = true;
        Some((id, self.wire_messages()))
    }

    /// Appends the assistant's message for the send triggered by `trigger`
    /// and drops the loading flag.
    pub fn finish_send(&mut self, trigger: &MessageId, content: String, now: DateTime<Utc>) {
        let floor = trigger
            .as_millis()
            .map(|ms| ms + 1)
            .unwrap_or_else(|| now.timestamp_millis());
        let id = self.issue_id(floor);
        self.messages.push(Message {
            id,
            content,
            role: Role::Assistant,
            timestamp: now,
        });
        self.loading = false;
    }

    pub fn wire_messages(&self) -> Vec<WireMessage> {
        self.messages.iter().map(WireMessage::from).collect()
    }

    pub fn conversation_title(&self) -> Option<String> {
        self.messages.first().map(|m| derive_title(&m.content))
    }

    pub fn reset_conversation(&mut self) {
        self.messages.clear();
        self.current_chat_id = None;
        self.loading = false;
        self.section = Section::Chat;
    }

    pub fn replace_conversation(&mut self, id: ChatId, messages: Vec<Message>) {
        self.messages = messages;
        self.current_chat_id = Some(id);
        self.loading = false;
        self.section = Section::Chat;
    }

    /// Adds a notice, or returns the id of an identical one already showing.
    pub fn push_notice(&mut self, text: impl Into<String>) -> u64 {
        let text = text.into();
        if let Some(existing) = self.notices.iter().find(|n| n.text == text) {
            return existing.id;
        }
        let id = self.next_notice_id;
        self.next_notice_id += 1;
        self.notices.push(Notice { id, text });
        if self.notices.len() > MAX_NOTICES {
            let excess = self.notices.len() - MAX_NOTICES;
            self.notices.drain(..excess);
        }
        id
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }
}
