use crate::error::SendError;

/// Pending user input.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Composer {
    text: String,
}

impl Composer {
    pub fn update_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Hands out the trimmed text and clears the composer, or leaves it
    /// untouched when sending is not possible. Emptiness is checked first so
    /// blank input is rejected regardless of connection state.
    pub fn take_outbound(
        &mut self,
        connected: bool,
        awaiting_reply: bool
    ) -> Result<String, SendError> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            return Err(SendError::Empty);
        }
        if !connected {
            return Err(SendError::Disconnected);
        }
        if awaiting_reply {
            return Err(SendError::AwaitingReply);
        }
        let content = trimmed.to_string();
        self.text.clear();
        Ok(content)
    }
}
