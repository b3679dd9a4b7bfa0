use chrono::{DateTime, Utc};

/// Label sent for a capture turn that carries no typed text.
pub const DEFAULT_USER_TEXT: &str = "Get feedback";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEntry {
    User {
        display_text: Option<String>,
        is_follow_up: bool,
        timestamp: DateTime<Utc>,
    },
    Assistant {
        content: String,
        frame_thumbnail: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ConversationEntry {
    pub fn capture_request() -> Self {
        ConversationEntry::User {
            display_text: Some(DEFAULT_USER_TEXT.to_string()),
            is_follow_up: false,
            timestamp: Utc::now(),
        }
    }

    pub fn follow_up(text: impl Into<String>) -> Self {
        ConversationEntry::User {
            display_text: Some(text.into()),
            is_follow_up: true,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, frame_thumbnail: Option<String>) -> Self {
        ConversationEntry::Assistant {
            content: content.into(),
            frame_thumbnail,
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ConversationEntry::User { .. } => "user",
            ConversationEntry::Assistant { .. } => "assistant",
        }
    }
}

/// Append-only transcript of one studio session. Entries are never edited or
/// removed, and the log is not persisted.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    entries: Vec<ConversationEntry>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ConversationEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest `max` entries, oldest first.
    pub fn recent(&self, max: usize) -> &[ConversationEntry] {
        let start = self.entries.len().saturating_sub(max);
        &self.entries[start..]
    }
}
