//! In-memory message board served behind the rate limiter.
//!
//! Messages are grouped by session and kept in insertion order. Each stored
//! message carries computed metadata (word and character counts).

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Largest page `list` will return.
pub const MAX_PAGE_SIZE: usize = 100;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    System,
}

impl FromStr for Sender {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Sender::User),
            "system" => Ok(Sender::System),
            _ => Err(()),
        }
    }
}

/// Message submitted by a client.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub content: String,
    pub sender: String,
}

/// Computed message metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageMetadata {
    pub word_count: usize,
    pub character_count: usize,
}

/// A stored message.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub message_id: Uuid,
    pub session_id: String,
    pub content: String,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
    pub metadata: MessageMetadata,
}

/// Filters and pagination for listing a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub sender: Option<String>,
}

/// Rejections of message board requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("sender must be 'user' or 'system', got '{0}'")]
    InvalidSender(String),

    #[error("content must not be empty")]
    EmptyContent,

    #[error("sender filter must be 'user' or 'system', got '{0}'")]
    InvalidFilter(String),

    #[error("limit must be at most 100, got {0}")]
    PageTooLarge(usize),
}

impl MessageError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            MessageError::InvalidSender(_) => "INVALID_FORMAT",
            MessageError::EmptyContent => "EMPTY_CONTENT",
            MessageError::InvalidFilter(_) | MessageError::PageTooLarge(_) => "INVALID_FILTER",
        }
    }

    /// Short human-readable summary.
    pub fn summary(&self) -> &'static str {
        match self {
            MessageError::InvalidSender(_) => "Invalid message format",
            MessageError::EmptyContent => "Empty message content",
            MessageError::InvalidFilter(_) | MessageError::PageTooLarge(_) => "Invalid filter",
        }
    }
}

/// Session-keyed message storage.
#[derive(Debug, Default)]
pub struct MessageBoard {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl MessageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a message.
    pub fn post(&self, new: NewMessage) -> Result<Message, MessageError> {
        let sender = new
            .sender
            .parse::<Sender>()
            .map_err(|_| MessageError::InvalidSender(new.sender.clone()))?;

        if new.content.trim().is_empty() {
            return Err(MessageError::EmptyContent);
        }

        let metadata = MessageMetadata {
            word_count: new.content.split_whitespace().count(),
            character_count: new.content.chars().count(),
        };
        let message = Message {
            message_id: Uuid::new_v4(),
            session_id: new.session_id,
            content: new.content,
            sender,
            created_at: Utc::now(),
            metadata,
        };

        self.sessions
            .write()
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    /// Messages of `session_id` in posting order, filtered and paginated.
    pub fn list(&self, session_id: &str, query: &ListQuery) -> Result<Vec<Message>, MessageError> {
        let sender = match query.sender.as_deref() {
            Some(s) => Some(
                s.parse::<Sender>()
                    .map_err(|_| MessageError::InvalidFilter(s.to_string()))?,
            ),
            None => None,
        };

        let limit = query.limit.unwrap_or(MAX_PAGE_SIZE);
        if limit > MAX_PAGE_SIZE {
            return Err(MessageError::PageTooLarge(limit));
        }

        let sessions = self.sessions.read();
        let Some(messages) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };

        Ok(messages
            .iter()
            .filter(|m| sender.map_or(true, |s| m.sender == s))
            .skip(query.offset.unwrap_or(0))
            .take(limit)
            .cloned()
            .collect())
    }
}
