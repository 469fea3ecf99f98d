pub mod composer;
pub mod transcript;

use crate::error::{ ChatError, SendError };
use crate::models::chat::{ self, Message };
use crate::models::websocket::{ ClientFrame, ServerFrame };
use composer::Composer;
use log::{ debug, error, info, warn };
use transcript::Transcript;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Read-only view handed to the presentation layer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub messages: Vec<Message>,
    pub connection: ConnectionState,
    pub connection_id: Option<String>,
    pub is_waiting: bool,
    pub composer: String,
    pub username: String,
}

impl ChatSnapshot {
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }
}

/// Transcript, composer and connection flags for one chat session.
///
/// Every mutation is a plain `&mut self` call: the owner is expected to drive
/// it from a single task so frames, timer events and user input are applied
/// one at a time in arrival order.
#[derive(Debug, Default)]
pub struct ChatState {
    transcript: Transcript,
    composer: Composer,
    connection: ConnectionState,
    connection_id: Option<String>,
    waiting: bool,
    streaming_id: Option<String>,
    allow_concurrent_sends: bool,
}

impl ChatState {
    pub fn new(allow_concurrent_sends: bool) -> Self {
        Self {
            allow_concurrent_sends,
            ..Default::default()
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn composer_text(&self) -> &str {
        self.composer.text()
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn streaming_id(&self) -> Option<&str> {
        self.streaming_id.as_deref()
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    /// The transport went away. A reply that was still streaming can never be
    /// finalized, so it is discarded the same way an `error` frame would.
    pub fn handle_disconnect(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.connection_id = None;
        self.waiting = false;
        self.discard_streaming();
    }

    /// Parses one inbound text frame and applies it. Malformed or unknown
    /// frames come back as `ChatError::Frame` with the state untouched.
    pub fn handle_raw(&mut self, raw: &str) -> Result<(), ChatError> {
        let frame: ServerFrame = serde_json::from_str(raw)?;
        self.apply(frame);
        Ok(())
    }

    pub fn apply(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Connected { id } => {
                info!("Connected to chat (connection id: {})", id.as_deref().unwrap_or("-"));
                self.connection = ConnectionState::Connected;
                if id.is_some() {
                    self.connection_id = id;
                }
            }
            ServerFrame::Start { id: Some(id), ts } => self.start_stream(id, ts),
            ServerFrame::Start { id: None, .. } => {
                debug!("Ignoring start frame without id");
            }
            ServerFrame::Delta { id: Some(id), delta: Some(delta) } => {
                if self.transcript.patch_by_id(&id, |m| m.content.push_str(&delta)) == 0 {
                    debug!("Delta for unknown message {}", id);
                }
            }
            ServerFrame::Delta { .. } => {
                debug!("Ignoring delta frame without id or text");
            }
            ServerFrame::Done { id, content, .. } => {
                if let Some(id) = id {
                    let content = content.filter(|c| !c.is_empty());
                    let patched = self.transcript.patch_by_id(&id, |m| {
                        if let Some(content) = &content {
                            m.content = content.clone();
                        }
                        m.streaming = false;
                    });
                    if patched == 0 {
                        debug!("Done for unknown message {}", id);
                    } else if self.streaming_id.as_deref() == Some(id.as_str()) {
                        self.streaming_id = None;
                    }
                }
                self.waiting = false;
            }
            ServerFrame::Response { id, content, ts } => {
                self.append_complete(id, content, ts);
                self.waiting = false;
            }
            ServerFrame::Proactive { id, content, ts } => {
                self.append_complete(id, content, ts);
            }
            ServerFrame::Error { message } => {
                error!("Chat error: {}", message.as_deref().unwrap_or("unknown error"));
                self.waiting = false;
                self.discard_streaming();
            }
            ServerFrame::Pong => {
                debug!("Received pong");
            }
        }
    }

    pub fn update_text(&mut self, text: impl Into<String>) {
        self.composer.update_text(text);
    }

    /// Appends the user's message optimistically and returns the frame to put
    /// on the wire. Nothing changes when the composer refuses.
    pub fn send(&mut self) -> Result<ClientFrame, SendError> {
        let awaiting_reply = self.waiting && !self.allow_concurrent_sends;
        let content = self.composer.take_outbound(self.is_connected(), awaiting_reply)?;
        self.transcript.append(Message::user(content.clone()));
        self.waiting = true;
        Ok(ClientFrame::Message { content })
    }

    pub fn snapshot(&self, username: &str) -> ChatSnapshot {
        ChatSnapshot {
            messages: self.transcript.snapshot(),
            connection: self.connection,
            connection_id: self.connection_id.clone(),
            is_waiting: self.waiting,
            composer: self.composer.text().to_string(),
            username: username.to_string(),
        }
    }

    fn start_stream(&mut self, id: String, ts: Option<f64>) {
        if self.transcript.contains(&id) {
            warn!("Ignoring duplicate start for message {}", id);
            return;
        }
        // One reply streams at a time; a new start settles the previous one as-is.
        if let Some(previous) = self.streaming_id.take() {
            warn!("Stream {} superseded by {}", previous, id);
            self.transcript.patch_by_id(&previous, |m| {
                m.streaming = false;
            });
        }
        self.transcript.append(Message::streaming(id.clone(), chat::timestamp_or_now(ts)));
        self.streaming_id = Some(id);
    }

    fn append_complete(&mut self, id: Option<String>, content: Option<String>, ts: Option<f64>) {
        match content.filter(|c| !c.is_empty()) {
            Some(content) => {
                let id = id.unwrap_or_else(chat::new_message_id);
                self.transcript.append(Message::assistant(id, content, chat::timestamp_or_now(ts)));
            }
            None => debug!("Ignoring complete message without content"),
        }
    }

    fn discard_streaming(&mut self) {
        if let Some(id) = self.streaming_id.take() {
            let removed = self.transcript.remove_by_id(&id);
            debug!("Discarded {} partial message(s) for {}", removed, id);
        }
    }
}
