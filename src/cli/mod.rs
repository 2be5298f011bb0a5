use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Remote Collaborator Args ---
    /// URL of the remote send-message (completion) function
    #[arg(long, env = "COMPLETION_URL", default_value = "http://127.0.0.1:8000/chat")]
    pub completion_url: String,

    /// URL of the remote function listing saved chats
    #[arg(long, env = "HISTORY_LIST_URL", default_value = "http://127.0.0.1:8000/get-chats")]
    pub history_list_url: String,

    /// URL of the remote function returning one chat (called with ?chat_id=)
    #[arg(long, env = "HISTORY_FETCH_URL", default_value = "http://127.0.0.1:8000/get-chat")]
    pub history_fetch_url: String,

    /// URL of the remote function saving a chat
    #[arg(long, env = "HISTORY_SAVE_URL", default_value = "http://127.0.0.1:8000/save-chat")]
    pub history_save_url: String,

    // --- Session Args ---
    /// Model identifier sent with every completion request
    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-3.5-turbo")]
    pub chat_model: String,

    /// Delay in milliseconds before a new conversation is saved after its first reply
    #[arg(long, env = "SAVE_DELAY_MS", default_value = "1000")]
    pub save_delay_ms: u64,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional port for the HTTP API serving navigation and static section content.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional shared secret. When set, clients must sign the connection timestamp with it.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
