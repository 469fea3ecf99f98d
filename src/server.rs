use crate::models::chat;
use crate::models::websocket::{ ClientFrame, ServerFrame };
use futures::{ SinkExt, StreamExt };
use log::{ info, warn, error, debug };
use std::error::Error;
use std::net::SocketAddr;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;
use tokio_tungstenite::{ accept_async, tungstenite::protocol::Message, WebSocketStream };
use uuid::Uuid;

const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

/// Development agent that speaks the clone chat protocol and streams each
/// message back word by word.
pub struct EchoAgent {
    listener: TcpListener,
}

impl EchoAgent {
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Box<dyn Error + Send + Sync>> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!("Echo agent listening on: ws://{}", self.listener.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!("Incoming connection from: {}", peer);

            tokio::spawn(async move {
                match accept_async(stream).await {
                    Ok(ws) => handle_connection(peer, ws).await,
                    Err(e) => error!("Handshake failed for {}: {}", peer, e),
                }
            });
        }
    }
}

async fn handle_connection<S>(peer: SocketAddr, websocket: WebSocketStream<S>)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let (mut tx, mut rx) = websocket.split();
    let connection_id = Uuid::new_v4().to_string();
    info!("Assigned connection ID {} to {}", connection_id, peer);

    if send_frame(&mut tx, &(ServerFrame::Connected { id: Some(connection_id.clone()) })).await.is_err() {
        error!("Failed to send greeting to {}", peer);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                info!("WebSocket connection closed or errored for {}: {}", peer, e);
                break;
            }
        };
        if message.len() > MAX_MESSAGE_SIZE {
            warn!("Message from {} exceeds size limit ({} > {})", peer, message.len(), MAX_MESSAGE_SIZE);
            break;
        }

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
                continue;
            }
            _ => {
                continue;
            }
        };

        let replies = match reply_frames(&text) {
            Some(replies) => replies,
            None => continue,
        };
        for frame in replies {
            if let Err(e) = send_frame(&mut tx, &frame).await {
                error!("Error sending frame to {}: {}", peer, e);
                return;
            }
        }
    }
    info!("WebSocket connection closed for {} (Conn ID: {})", peer, connection_id);
}

/// Frames the agent answers one client frame with. `None` means the frame is
/// ignored.
fn reply_frames(text: &str) -> Option<Vec<ServerFrame>> {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            return Some(vec![ServerFrame::Error { message: Some("Invalid JSON".to_string()) }]);
        }
    };
    match serde_json::from_value::<ClientFrame>(value) {
        Ok(ClientFrame::Ping) => Some(vec![ServerFrame::Pong]),
        Ok(ClientFrame::Message { content }) => {
            let content = content.trim();
            if content.is_empty() {
                return None;
            }
            Some(stream_reply(content))
        }
        Err(e) => {
            debug!("Ignoring unknown client frame: {}", e);
            None
        }
    }
}

fn stream_reply(content: &str) -> Vec<ServerFrame> {
    let id = format!("resp_{}", chat::now_millis());
    let ts = Some((chat::now_millis() as f64) / 1000.0);
    let mut frames = vec![ServerFrame::Start { id: Some(id.clone()), ts }];
    frames.extend(
        content.split_inclusive(' ').map(|word| ServerFrame::Delta {
            id: Some(id.clone()),
            delta: Some(word.to_string()),
        })
    );
    frames.push(ServerFrame::Done {
        id: Some(id),
        content: Some(content.to_string()),
        ts,
    });
    frames
}

async fn send_frame<Si>(tx: &mut Si, frame: &ServerFrame) -> Result<(), Box<dyn Error + Send + Sync>>
    where Si: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin
{
    let json = serde_json::to_string(frame)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}
