pub mod cli;
pub mod content;
pub mod models;
pub mod remote;
pub mod server;
pub mod session;

use cli::Args;
use log::info;
use server::{ AppContext, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("HTTP API Port: {:?}", args.http_port);
    info!("Connection Signatures: {}", args.server_api_key.as_deref().map_or(false, |k| !k.is_empty()));
    info!("Completion URL: {}", args.completion_url);
    info!("History List URL: {}", args.history_list_url);
    info!("History Fetch URL: {}", args.history_fetch_url);
    info!("History Save URL: {}", args.history_save_url);
    info!("Chat Model: {}", args.chat_model);
    info!("Deferred Save Delay: {} ms", args.save_delay_ms);
    info!("-------------------------");

    let context = Arc::new(AppContext::from_args(&args)?);
    let server = Server::new(&args, context);
    server.run().await
}
