//! Conversation sessions over durable history.
//!
//! - [`store`]: the system of record (SQLite or in-memory)
//! - [`ConversationCache`]: recent windows, TTL-bounded
//! - [`WriteBackQueue`]: bounded background cache refreshes
//! - [`ChatService`]: the read/answer/record flow tying them together

pub mod cache;
pub mod config;
pub mod errors;
pub mod message;
pub mod prompt;
pub mod service;
pub mod store;
pub mod writeback;

pub use cache::{ConversationCache, Generation, cache_key};
pub use config::{HISTORY_CEILING, SessionConfig};
pub use errors::{Result, SessionError};
pub use message::{CacheEntry, ChatMessage, NewMessage, Order, Role, Topic};
pub use service::{
    ChatReply, ChatRequest, ChatService, CompletionProvider, ContextSource, LlmCompletion,
};
pub use store::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};
pub use writeback::{QueueStats, WriteBackQueue};
