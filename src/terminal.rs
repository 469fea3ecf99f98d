use crate::chat::{ ChatSnapshot, ConnectionState };
use crate::connection::ChatClient;
use crate::models::chat::Role;
use log::info;
use std::collections::HashSet;
use std::error::Error;
use tokio::io::{ AsyncBufReadExt, AsyncWriteExt, BufReader };

/// Turns successive snapshots into printable lines. A message is printed once,
/// when it is complete; a reply discarded mid-stream is never shown.
#[derive(Debug, Default)]
pub struct Renderer {
    printed: HashSet<String>,
    connection: Option<ConnectionState>,
    waiting: bool,
}

impl Renderer {
    pub fn render(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.connection != Some(snapshot.connection) {
            let status = match snapshot.connection {
                ConnectionState::Connected => Some("[connected]"),
                ConnectionState::Disconnected if self.connection.is_some() =>
                    Some("[disconnected, reconnecting]"),
                _ => None,
            };
            lines.extend(status.map(str::to_string));
            self.connection = Some(snapshot.connection);
        }

        for message in snapshot.messages.iter().filter(|m| !m.streaming) {
            if self.printed.insert(message.id.clone()) {
                let who = match message.role {
                    Role::User => snapshot.username.as_str(),
                    Role::Assistant => "clone",
                };
                lines.push(format!("{}: {}", who, message.content));
            }
        }

        if snapshot.is_waiting && !self.waiting {
            lines.push("...".to_string());
        }
        self.waiting = snapshot.is_waiting;

        lines
    }
}

/// Line-based chat loop over stdin/stdout. `/quit` or end of input ends the
/// session.
pub async fn run_terminal(mut client: ChatClient) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut renderer = Renderer::default();
    let mut stdout = tokio::io::stdout();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        for line in renderer.render(&client.snapshot()) {
            stdout.write_all(format!("{}\n", line).as_bytes()).await?;
        }
        stdout.flush().await?;

        tokio::select! {
            line = input.next_line() => {
                match line? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) => {
                        client.update_text(line);
                        client.send();
                    }
                    None => break,
                }
            }
            alive = client.changed() => {
                if !alive {
                    break;
                }
            }
        }
    }

    info!("Leaving chat");
    client.shutdown().await;
    Ok(())
}
