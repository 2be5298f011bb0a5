use serde::{ Serialize, Deserialize };
use crate::models::chat::{ ChatId, Section };
use crate::session::SessionState;

#[derive(Serialize, Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "navigate")] Navigate {
        section: Section,
    },
    #[serde(rename = "toggle_sidebar")]
    ToggleSidebar,
    #[serde(rename = "set_input")] SetInput {
        text: String,
    },
    /// Sends `content` when given, otherwise whatever is in the input buffer.
    #[serde(rename = "send")] Send {
        #[serde(default)]
        content: Option<String>,
    },
    #[serde(rename = "load_history")]
    LoadHistory,
    #[serde(rename = "load_chat")] LoadChat {
        id: ChatId,
    },
    #[serde(rename = "save")]
    Save,
    #[serde(rename = "new_chat")]
    NewChat,
    #[serde(rename = "dismiss_notice")] DismissNotice {
        id: u64,
    },
}

#[derive(Serialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage<'a> {
    #[serde(rename = "state")] State {
        session_id: &'a str,
        state: &'a SessionState,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}
