pub mod chat;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod models;
pub mod server;
pub mod terminal;
pub mod websocket;

use cli::Args;
use config::ClientConfig;
use connection::ChatClient;
use log::info;
use server::EchoAgent;
use std::error::Error;
use std::sync::Arc;
use websocket::WsConnector;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    if let Some(addr) = &args.serve_addr {
        info!("Starting echo agent on: {}", addr);
        return EchoAgent::bind(addr).await?.run().await;
    }

    let config = ClientConfig::from_args(&args)?;

    info!("--- Chat Configuration ---");
    info!("Endpoint: {}", config.url);
    info!("Reconnect Delay: {:?}", config.reconnect_delay);
    info!("Ping Interval: {:?}", config.ping_interval);
    match config.pong_timeout {
        Some(timeout) => info!("Pong Timeout: {:?}", timeout),
        None => info!("Pong Timeout: disabled"),
    }
    info!("Concurrent Sends: {}", config.allow_concurrent_sends);
    info!("Username: {}", config.username);
    info!("--------------------------");

    let client = ChatClient::spawn(config, Arc::new(WsConnector));
    terminal::run_terminal(client).await
}
