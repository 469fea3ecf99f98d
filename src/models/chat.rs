use chrono::Utc;
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    pub streaming: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
            streaming: false,
        }
    }

    /// Empty assistant message that will receive deltas until finalized.
    pub fn streaming(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: String::new(),
            timestamp,
            streaming: true,
        }
    }

    pub fn assistant(id: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            streaming: false,
        }
    }
}

pub fn new_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Agents stamp frames in float seconds; anything already in the
/// millisecond range is passed through. Missing or zero falls back to now.
pub fn timestamp_or_now(ts: Option<f64>) -> i64 {
    match ts {
        Some(ts) if ts.is_finite() && ts > 0.0 => {
            if ts < 1e12 { (ts * 1000.0) as i64 } else { ts as i64 }
        }
        _ => now_millis(),
    }
}
