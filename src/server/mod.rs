pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::remote::{ new_clients, ClientError, CompletionClient, HistoryClient, RemoteConfig };
use crate::session::{ SessionController, SessionOptions };
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Shared by every connection: the collaborator clients and session options.
pub struct AppContext {
    completion: Arc<dyn CompletionClient>,
    history: Arc<dyn HistoryClient>,
    options: SessionOptions,
}

impl AppContext {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        history: Arc<dyn HistoryClient>,
        options: SessionOptions
    ) -> Self {
        Self {
            completion,
            history,
            options,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self, ClientError> {
        let (completion, history) = new_clients(&RemoteConfig::from(args))?;
        let options = SessionOptions {
            model: args.chat_model.clone(),
            save_delay: Duration::from_millis(args.save_delay_ms),
        };
        Ok(Self::new(completion, history, options))
    }

    pub fn new_session(&self) -> SessionController {
        SessionController::new(
            Arc::clone(&self.completion),
            Arc::clone(&self.history),
            self.options.clone()
        )
    }
}

pub struct Server {
    addr: String,
    http_port: Option<u16>,
    api_key: Option<String>,
    context: Arc<AppContext>,
}

impl Server {
    pub fn new(args: &Args, context: Arc<AppContext>) -> Self {
        Self {
            addr: args.server_addr.clone(),
            http_port: args.http_port,
            api_key: args.server_api_key.clone().filter(|k| !k.is_empty()),
            context,
        }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.http_port {
            api::start_http_server(http_port).await?;
        }

        websocket::start_ws_server(
            &self.addr,
            Arc::clone(&self.context),
            self.api_key.clone()
        ).await
    }
}
