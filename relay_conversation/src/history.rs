//! Sliding window over conversation history.

use relay_core::ChatMessage;

/// Selects the most recent `size` turns of a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindow {
    size: usize,
}

impl HistoryWindow {
    #[must_use]
    pub const fn new(size: usize) -> Self {
        Self { size }
    }

    /// The suffix of `messages` that fits in the window, oldest first.
    #[must_use]
    pub fn select<'a>(&self, messages: &'a [ChatMessage]) -> &'a [ChatMessage] {
        let start = messages.len().saturating_sub(self.size);
        &messages[start..]
    }

    /// Owned variant of [`HistoryWindow::select`] that reuses the allocation.
    #[must_use]
    pub fn truncate(&self, mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let start = messages.len().saturating_sub(self.size);
        messages.drain(..start);
        messages
    }
}
