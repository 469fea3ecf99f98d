use serde::{ Serialize, Deserialize };

/// Frames the client sends to the agent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "message")] Message {
        content: String,
    },
    #[serde(rename = "ping")]
    Ping,
}

/// Frames the agent sends to the client. Required fields are optional here so
/// that a frame missing them is a no-op for the interpreter rather than a
/// parse failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "connected")] Connected {
        id: Option<String>,
    },
    #[serde(rename = "start")] Start {
        id: Option<String>,
        ts: Option<f64>,
    },
    #[serde(rename = "delta")] Delta {
        id: Option<String>,
        delta: Option<String>,
    },
    #[serde(rename = "done")] Done {
        id: Option<String>,
        content: Option<String>,
        ts: Option<f64>,
    },
    #[serde(rename = "response")] Response {
        id: Option<String>,
        content: Option<String>,
        ts: Option<f64>,
    },
    #[serde(rename = "proactive")] Proactive {
        id: Option<String>,
        content: Option<String>,
        ts: Option<f64>,
    },
    #[serde(rename = "error")] Error {
        message: Option<String>,
    },
    #[serde(rename = "pong")]
    Pong,
}
