use crate::cli::Args;
use crate::error::ChatError;
use std::time::Duration;
use url::Url;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000/clone/ws";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Settings consumed by the chat session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: Url,
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    /// `None` keeps liveness advisory: a silent half-open socket is never dropped.
    pub pong_timeout: Option<Duration>,
    pub allow_concurrent_sends: bool,
    pub username: String,
}

impl ClientConfig {
    pub fn from_args(args: &Args) -> Result<Self, ChatError> {
        let pong_timeout = Some(Duration::from_secs(args.pong_timeout_secs)).filter(
            |t| !t.is_zero()
        );
        Ok(Self {
            url: parse_ws_url(&args.ws_url)?,
            reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
            ping_interval: Duration::from_secs(args.ping_interval_secs.max(1)),
            pong_timeout,
            allow_concurrent_sends: args.allow_concurrent_sends,
            username: args.username.clone(),
        })
    }
}

pub fn parse_ws_url(raw: &str) -> Result<Url, ChatError> {
    let url = Url::parse(raw).map_err(|source| ChatError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ChatError::UnsupportedScheme(other.to_string())),
    }
}
