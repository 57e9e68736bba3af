//! Chat data models.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(SessionError::Corrupt(format!("unknown role: {other}"))),
        }
    }
}

/// Sort direction by `(created_at, id)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Message before the store assigns id and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    pub user_id: u64,
    pub topic: String,
    pub role: Role,
    /// Model that produced (or was asked) the message.
    pub model: String,
    pub content: String,
}

/// A stored message. Immutable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Durable commit sequence; breaks timestamp ties.
    pub id: i64,
    pub user_id: u64,
    pub topic: String,
    pub role: Role,
    pub model: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub user_id: u64,
    pub name: String,
    /// Never moves backwards.
    pub last_message: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Cached window of a conversation, stored as JSON under
/// `chat:{user}:{topic}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub user_id: u64,
    pub topic: String,
    pub refreshed_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    pub count: usize,
}
