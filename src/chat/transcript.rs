use crate::models::chat::Message;

/// Ordered conversation messages. Order is insertion order and never changes;
/// the only in-place edits go through `patch_by_id`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Applies `updater` to every message with a matching id and returns how
    /// many were touched. Zero matches is not an error: a late delta for a
    /// message that was already discarded is a valid race.
    pub fn patch_by_id<F>(&mut self, id: &str, mut updater: F) -> usize where F: FnMut(&mut Message) {
        let mut patched = 0;
        for message in self.messages.iter_mut().filter(|m| m.id == id) {
            updater(message);
            patched += 1;
        }
        patched
    }

    pub fn remove_by_id(&mut self, id: &str) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        before - self.messages.len()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
