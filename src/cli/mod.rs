use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Connection Args ---
    /// WebSocket endpoint of the clone agent (ws:// or wss://)
    #[arg(long, env = "CLONE_WS_URL", default_value = "ws://localhost:8000/clone/ws")]
    pub ws_url: String,

    /// Fixed delay in milliseconds before reconnecting after the connection closes
    #[arg(long, env = "CLONE_RECONNECT_DELAY_MS", default_value = "3000")]
    pub reconnect_delay_ms: u64,

    /// Interval in seconds between liveness pings while connected
    #[arg(long, env = "CLONE_PING_INTERVAL_SECS", default_value = "30")]
    pub ping_interval_secs: u64,

    /// Drop the connection when nothing has been received for this many seconds. 0 disables the check.
    #[arg(long, env = "CLONE_PONG_TIMEOUT_SECS", default_value = "0")]
    pub pong_timeout_secs: u64,

    // --- Composer Args ---
    /// Allow sending another message while a reply is still pending
    #[arg(long, env = "CLONE_ALLOW_CONCURRENT_SENDS", default_value = "false")]
    pub allow_concurrent_sends: bool,

    /// Display name shown for your own messages
    #[arg(long, env = "CLONE_USERNAME", default_value = "Aarav")]
    pub username: String,

    // --- General App Args ---
    /// Run the loopback echo agent on this address (e.g. 127.0.0.1:8000) instead of the chat client
    #[arg(long = "serve", env = "CLONE_SERVE_ADDR")]
    pub serve_addr: Option<String>,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
