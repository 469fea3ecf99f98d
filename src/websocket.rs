use crate::error::ChatError;
use async_trait::async_trait;
use futures::{ future, Sink, SinkExt, Stream, StreamExt };
use log::{ debug, info, warn };
use std::pin::Pin;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChatError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

/// An open connection to the agent: text frames out, text frames in. The
/// stream ending means the connection closed.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
        where
            Si: Sink<String, Error = ChatError> + Send + 'static,
            St: Stream<Item = Result<String, ChatError>> + Send + 'static
    {
        Self { sink: Box::pin(sink), stream: Box::pin(stream) }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Transport, ChatError>;
}

/// Connects over tokio-tungstenite. Control frames are handled by tungstenite
/// itself; only text frames reach the session.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Transport, ChatError> {
        let (websocket, response) = connect_async(url.as_str()).await?;
        info!("WebSocket handshake with {} completed ({})", url, response.status());

        let (tx, rx) = websocket.split();
        let sink = tx.with(|text: String| future::ready(Ok::<_, ChatError>(Message::Text(text))));
        let stream = rx.filter_map(|message| future::ready(text_frame(message)));

        Ok(Transport::new(sink, stream))
    }
}

fn text_frame(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>
) -> Option<Result<String, ChatError>> {
    match message {
        Ok(Message::Text(text)) => {
            if text.len() > MAX_MESSAGE_SIZE {
                warn!("Dropping oversized frame ({} > {})", text.len(), MAX_MESSAGE_SIZE);
                return None;
            }
            Some(Ok(text))
        }
        Ok(Message::Close(frame)) => {
            info!("Received close frame: {:?}", frame);
            None
        }
        Ok(Message::Binary(_)) => {
            warn!("Ignoring binary message");
            None
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
            debug!("Ignoring control frame");
            None
        }
        Err(e) => Some(Err(ChatError::from(e))),
    }
}
