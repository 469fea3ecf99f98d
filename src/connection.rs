use crate::chat::{ ChatSnapshot, ChatState, ConnectionState };
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::models::websocket::ClientFrame;
use crate::websocket::{ Connector, Transport };
use futures::future::BoxFuture;
use futures::{ SinkExt, StreamExt };
use log::{ debug, error, info, warn };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{ mpsc, watch };
use tokio::task::JoinHandle;
use tokio::time::{ self, Instant, Interval, MissedTickBehavior, Sleep };

#[derive(Debug)]
enum Command {
    Connect,
    UpdateText(String),
    Send,
    Shutdown,
}

/// Handle to a running chat session.
///
/// The session task is the only owner of the transport, the reconnect timer
/// and the chat state. Dropping every handle closes the command channel, which
/// tears the session down just like `shutdown`.
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ChatSnapshot>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// Spawns the session task and starts connecting immediately.
    pub fn spawn(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let mut state = ChatState::new(config.allow_concurrent_sends);
        state.set_connection(ConnectionState::Connecting);
        let (snapshot_tx, snapshots) = watch::channel(state.snapshot(&config.username));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let session = Session {
            config,
            connector,
            state,
            snapshots: snapshot_tx,
            commands: command_rx,
        };
        let task = tokio::spawn(session.run());

        Self { commands, snapshots, task }
    }

    /// Connects now if the session is waiting to reconnect. No-op while a
    /// connection is open or being opened.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    pub fn update_text(&self, text: impl Into<String>) {
        self.command(Command::UpdateText(text.into()));
    }

    pub fn send(&self) {
        self.command(Command::Send);
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    /// Waits for the next published snapshot. Returns `false` once the
    /// session has stopped.
    pub async fn changed(&mut self) -> bool {
        self.snapshots.changed().await.is_ok()
    }

    /// Closes the transport, cancels any pending reconnect and waits for the
    /// session task to finish.
    pub async fn shutdown(self) {
        let ChatClient { commands, task, .. } = self;
        let _ = commands.send(Command::Shutdown);
        drop(commands);
        if let Err(e) = task.await {
            error!("Chat session task failed: {}", e);
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Chat session is no longer running");
        }
    }
}

enum Link {
    Connecting(BoxFuture<'static, Result<Transport, ChatError>>),
    Open {
        transport: Transport,
        heartbeat: Interval,
        last_inbound: Instant,
    },
    Waiting(Pin<Box<Sleep>>),
}

enum Step {
    Command(Option<Command>),
    Opened(Result<Transport, ChatError>),
    Inbound(Option<Result<String, ChatError>>),
    Heartbeat,
    Retry,
}

struct Session {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    state: ChatState,
    snapshots: watch::Sender<ChatSnapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl Session {
    async fn run(mut self) {
        let mut link = self.open();
        self.publish();

        loop {
            let step = match &mut link {
                Link::Connecting(attempt) =>
                    tokio::select! {
                        command = self.commands.recv() => Step::Command(command),
                        result = attempt => Step::Opened(result),
                    },
                Link::Open { transport, heartbeat, .. } =>
                    tokio::select! {
                        command = self.commands.recv() => Step::Command(command),
                        frame = transport.stream.next() => Step::Inbound(frame),
                        _ = heartbeat.tick() => Step::Heartbeat,
                    },
                Link::Waiting(retry) =>
                    tokio::select! {
                        command = self.commands.recv() => Step::Command(command),
                        _ = retry.as_mut() => Step::Retry,
                    },
            };

            link = match step {
                Step::Command(None) | Step::Command(Some(Command::Shutdown)) => {
                    self.teardown(link).await;
                    break;
                }
                Step::Command(Some(command)) => self.handle_command(command, link).await,
                Step::Opened(Ok(transport)) => {
                    info!("WebSocket connected to {}", self.config.url);
                    self.state.set_connection(ConnectionState::Connected);
                    self.open_link(transport)
                }
                Step::Opened(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    self.closed()
                }
                Step::Inbound(Some(Ok(text))) => {
                    if let Link::Open { last_inbound, .. } = &mut link {
                        *last_inbound = Instant::now();
                    }
                    if let Err(e) = self.state.handle_raw(&text) {
                        warn!("Failed to parse WebSocket message: {}", e);
                    }
                    link
                }
                Step::Inbound(Some(Err(e))) => {
                    error!("WebSocket error: {}", e);
                    self.closed()
                }
                Step::Inbound(None) => self.closed(),
                Step::Heartbeat => self.heartbeat(link).await,
                Step::Retry => {
                    info!("Reconnecting...");
                    self.open()
                }
            };
            self.publish();
        }
    }

    async fn handle_command(&mut self, command: Command, mut link: Link) -> Link {
        match command {
            Command::Connect => {
                if let Link::Waiting(_) = link {
                    return self.open();
                }
                debug!("Connect requested while a connection is already open or opening");
            }
            Command::UpdateText(text) => self.state.update_text(text),
            Command::Send => {
                match self.state.send() {
                    Ok(frame) => {
                        if let Link::Open { transport, .. } = &mut link {
                            if let Err(e) = transmit(transport, &frame).await {
                                error!("Failed to send message: {}", e);
                                return self.closed();
                            }
                        }
                    }
                    Err(e) => warn!("Message not sent: {}", e),
                }
            }
            Command::Shutdown => {}
        }
        link
    }

    async fn heartbeat(&mut self, mut link: Link) -> Link {
        if let Link::Open { transport, last_inbound, .. } = &mut link {
            if let Some(timeout) = self.config.pong_timeout {
                if last_inbound.elapsed() > timeout {
                    warn!("Nothing received for {:?}, dropping connection", last_inbound.elapsed());
                    if let Err(e) = transport.sink.close().await {
                        debug!("Error closing stale connection: {}", e);
                    }
                    return self.closed();
                }
            }
            if let Err(e) = transmit(transport, &ClientFrame::Ping).await {
                error!("Failed to send ping: {}", e);
            }
        }
        link
    }

    fn open(&mut self) -> Link {
        info!("Connecting to chat at {}", self.config.url);
        self.state.set_connection(ConnectionState::Connecting);
        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        Link::Connecting(Box::pin(async move { connector.connect(&url).await }))
    }

    fn open_link(&self, transport: Transport) -> Link {
        let period = self.config.ping_interval;
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Link::Open {
            transport,
            heartbeat,
            last_inbound: Instant::now(),
        }
    }

    /// Exactly one reconnect is scheduled per close; the old transport is
    /// dropped by the caller replacing the link.
    fn closed(&mut self) -> Link {
        info!("WebSocket disconnected, retrying in {:?}", self.config.reconnect_delay);
        self.state.handle_disconnect();
        Link::Waiting(Box::pin(time::sleep(self.config.reconnect_delay)))
    }

    async fn teardown(&mut self, link: Link) {
        if let Link::Open { mut transport, .. } = link {
            if let Err(e) = transport.sink.close().await {
                debug!("Error closing WebSocket: {}", e);
            }
        }
        self.state.handle_disconnect();
        self.publish();
        info!("Chat session closed");
    }

    fn publish(&self) {
        let next = self.state.snapshot(&self.config.username);
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn transmit(transport: &mut Transport, frame: &ClientFrame) -> Result<(), ChatError> {
    let json = serde_json::to_string(frame)?;
    transport.sink.send(json).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_ws_url;
    use crate::models::chat::Role;
    use async_trait::async_trait;
    use futures::channel::mpsc as fmpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    struct MockServer {
        inbound: fmpsc::UnboundedSender<Result<String, ChatError>>,
        outbound: fmpsc::UnboundedReceiver<String>,
    }

    impl MockServer {
        fn push(&self, frame: &str) {
            self.inbound.unbounded_send(Ok(frame.to_string())).unwrap();
        }

        async fn next_frame(&mut self) -> Option<serde_json::Value> {
            let text = self.outbound.next().await?;
            Some(serde_json::from_str(&text).unwrap())
        }
    }

    struct MockConnector {
        servers: fmpsc::UnboundedSender<MockServer>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        failures: Mutex<usize>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &Url) -> Result<Transport, ChatError> {
            self.attempts.lock().unwrap().push(Instant::now());
            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ChatError::Closed);
                }
            }
            let (in_tx, in_rx) = fmpsc::unbounded();
            let (out_tx, out_rx) = fmpsc::unbounded();
            self.servers
                .unbounded_send(MockServer { inbound: in_tx, outbound: out_rx })
                .unwrap();
            Ok(Transport::new(out_tx.sink_map_err(|_| ChatError::Closed), in_rx))
        }
    }

    fn mock(
        failures: usize
    ) -> (Arc<MockConnector>, fmpsc::UnboundedReceiver<MockServer>, Arc<Mutex<Vec<Instant>>>) {
        let (servers, server_rx) = fmpsc::unbounded();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let connector = MockConnector {
            servers,
            attempts: Arc::clone(&attempts),
            failures: Mutex::new(failures),
        };
        (Arc::new(connector), server_rx, attempts)
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            url: parse_ws_url("ws://localhost:8000/clone/ws").unwrap(),
            reconnect_delay: Duration::from_secs(3),
            ping_interval: Duration::from_secs(30),
            pong_timeout: None,
            allow_concurrent_sends: false,
            username: "tester".to_string(),
        }
    }

    async fn wait_for<F>(client: &mut ChatClient, predicate: F) -> ChatSnapshot
        where F: Fn(&ChatSnapshot) -> bool
    {
        loop {
            let snapshot = client.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            assert!(client.changed().await, "session stopped");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connects_on_spawn() {
        let (connector, mut servers, attempts) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let server = servers.next().await.unwrap();
        server.push(r#"{"type":"connected","id":"c1"}"#);
        let snapshot = wait_for(&mut client, |s| s.connection_id.is_some()).await;
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.username, "tester");
        assert_eq!(attempts.lock().unwrap().len(), 1);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_transmits_and_streams_reply() {
        let (connector, mut servers, _) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let mut server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;

        client.update_text("  hello  ");
        client.send();
        let frame = server.next_frame().await.unwrap();
        assert_eq!(frame, serde_json::json!({"type": "message", "content": "hello"}));
        let snapshot = wait_for(&mut client, |s| s.is_waiting).await;
        assert_eq!(snapshot.messages[0].role, Role::User);
        assert_eq!(snapshot.composer, "");

        server.push(r#"{"type":"start","id":"resp_1"}"#);
        server.push(r#"{"type":"delta","id":"resp_1","delta":"hi "}"#);
        server.push(r#"{"type":"delta","id":"resp_1","delta":"there"}"#);
        server.push(r#"{"type":"done","id":"resp_1","content":"hi there"}"#);
        let snapshot = wait_for(&mut client, |s| !s.is_waiting).await;
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[1].content, "hi there");
        assert!(!snapshot.messages[1].streaming);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped() {
        let (connector, mut servers, _) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        server.push("definitely not json");
        server.push(r#"{"type":"proactive","content":"still here"}"#);
        let snapshot = wait_for(&mut client, |s| !s.messages.is_empty()).await;
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.is_connected());
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_only_after_fixed_delay() {
        let (connector, mut servers, attempts) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let first = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;

        let closed_at = Instant::now();
        drop(first);
        wait_for(&mut client, |s| s.connection == ConnectionState::Disconnected).await;
        assert!(closed_at.elapsed() < Duration::from_secs(3));
        assert_eq!(attempts.lock().unwrap().len(), 1);

        let _second = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].duration_since(closed_at) >= Duration::from_secs(3));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_is_retried() {
        let (connector, mut servers, attempts) = mock(2);
        let mut client = ChatClient::spawn(test_config(), connector);
        let _server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 3);
        assert!(attempts[1].duration_since(attempts[0]) >= Duration::from_secs(3));
        assert!(attempts[2].duration_since(attempts[1]) >= Duration::from_secs(3));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_skips_the_wait_and_is_idempotent_when_open() {
        let (connector, mut servers, attempts) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let first = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        client.connect();
        client.update_text("sync");
        wait_for(&mut client, |s| s.composer == "sync").await;
        assert_eq!(attempts.lock().unwrap().len(), 1);

        let closed_at = Instant::now();
        drop(first);
        wait_for(&mut client, |s| s.connection == ConnectionState::Disconnected).await;
        client.connect();
        let _second = servers.next().await.unwrap();
        assert!(closed_at.elapsed() < Duration::from_secs(3));
        assert_eq!(attempts.lock().unwrap().len(), 2);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_takes_the_disconnect_path() {
        let (connector, mut servers, attempts) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let MockServer { inbound, outbound } = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        drop(outbound);

        client.update_text("lost");
        client.send();
        let snapshot = wait_for(&mut client, |s| !s.is_connected()).await;
        assert!(!snapshot.is_waiting);
        assert_eq!(snapshot.messages.len(), 1);
        drop(inbound);

        let _second = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        assert_eq!(attempts.lock().unwrap().len(), 2);

        client.update_text("again");
        client.send();
        let snapshot = wait_for(&mut client, |s| s.is_waiting).await;
        assert_eq!(snapshot.messages.len(), 2);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_mid_stream_discards_partial_reply() {
        let (connector, mut servers, _) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let mut server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        client.update_text("question");
        client.send();
        server.next_frame().await.unwrap();
        server.push(r#"{"type":"start","id":"X"}"#);
        server.push(r#"{"type":"delta","id":"X","delta":"half"}"#);
        wait_for(&mut client, |s| s.messages.len() == 2).await;

        drop(server);
        let snapshot = wait_for(&mut client, |s| !s.is_connected()).await;
        assert_eq!(snapshot.messages.len(), 1);
        assert!(!snapshot.is_waiting);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pings_every_interval_without_timeout_by_default() {
        let (connector, mut servers, attempts) = mock(0);
        let started = Instant::now();
        let mut client = ChatClient::spawn(test_config(), connector);
        let mut server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;

        for n in 1..=4u32 {
            let frame = server.next_frame().await.unwrap();
            assert_eq!(frame, serde_json::json!({"type": "ping"}));
            assert!(started.elapsed() >= Duration::from_secs(30) * n);
        }
        // The agent never answered, yet the connection is kept.
        assert!(client.snapshot().is_connected());
        assert_eq!(attempts.lock().unwrap().len(), 1);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_dropped_when_pong_timeout_enabled() {
        let (connector, mut servers, attempts) = mock(0);
        let config = ClientConfig {
            pong_timeout: Some(Duration::from_secs(45)),
            ..test_config()
        };
        let started = Instant::now();
        let mut client = ChatClient::spawn(config, connector);
        let mut first = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;

        assert_eq!(first.next_frame().await.unwrap(), serde_json::json!({"type": "ping"}));
        // The stale check closes our sink, which ends the server's view.
        assert!(first.next_frame().await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(60));

        let _second = servers.next().await.unwrap();
        assert_eq!(attempts.lock().unwrap().len(), 2);
        assert!(started.elapsed() >= Duration::from_secs(63));
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_alive_with_timeout_enabled() {
        let (connector, mut servers, attempts) = mock(0);
        let config = ClientConfig {
            pong_timeout: Some(Duration::from_secs(45)),
            ..test_config()
        };
        let mut client = ChatClient::spawn(config, connector);
        let mut server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;

        for _ in 0..4 {
            assert_eq!(server.next_frame().await.unwrap(), serde_json::json!({"type": "ping"}));
            server.push(r#"{"type":"pong"}"#);
        }
        assert!(client.snapshot().is_connected());
        assert_eq!(attempts.lock().unwrap().len(), 1);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_transport() {
        let (connector, mut servers, _) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let mut server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        let mut watcher = client.subscribe();
        client.shutdown().await;
        assert!(server.outbound.next().await.is_none());
        assert_eq!(watcher.borrow_and_update().connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_reconnect() {
        let (connector, mut servers, attempts) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let first = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        drop(first);
        wait_for(&mut client, |s| s.connection == ConnectionState::Disconnected).await;
        client.shutdown().await;

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_session() {
        let (connector, mut servers, _) = mock(0);
        let mut client = ChatClient::spawn(test_config(), connector);
        let mut server = servers.next().await.unwrap();
        wait_for(&mut client, |s| s.is_connected()).await;
        drop(client);
        assert!(server.outbound.next().await.is_none());
    }
}
