//! Text input buffer with a character cap.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Longest prefix of `text` holding at most `max_chars` characters.
#[must_use]
pub fn clamp(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Pending user text. Text beyond the cap is dropped when it is set.
#[derive(Debug)]
pub struct InputBuffer {
    text: Mutex<String>,
    max_chars: usize,
}

impl InputBuffer {
    /// Create an empty buffer accepting up to `max_chars` characters.
    #[must_use]
    pub const fn new(max_chars: usize) -> Self {
        Self {
            text: Mutex::new(String::new()),
            max_chars,
        }
    }

    fn text(&self) -> MutexGuard<'_, String> {
        self.text.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the contents, truncated to the cap. Returns the stored
    /// character count.
    pub fn set(&self, text: &str) -> usize {
        let clamped = clamp(text, self.max_chars);
        let mut buffer = self.text();
        buffer.clear();
        buffer.push_str(clamped);
        clamped.chars().count()
    }

    /// Current contents.
    #[must_use]
    pub fn contents(&self) -> String {
        self.text().clone()
    }

    /// Empty the buffer.
    pub fn clear(&self) {
        self.text().clear();
    }

    /// Number of characters held.
    #[must_use]
    pub fn char_count(&self) -> usize {
        self.text().chars().count()
    }

    /// Character cap.
    #[must_use]
    pub const fn max_chars(&self) -> usize {
        self.max_chars
    }
}
