//! Durable chat history: the system of record.
//!
//! Windows are always the *most recent* `limit` messages of a thread,
//! returned in the requested order, ties broken by commit sequence.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::errors::Result;
use crate::message::{ChatMessage, NewMessage, Order, Topic};

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryHistoryStore;
pub use sqlite_store::SqliteHistoryStore;

pub trait HistoryStore: Send + Sync {
    /// Stores one message and creates or bumps its topic.
    fn create_message(&self, msg: NewMessage) -> BoxFuture<'_, Result<ChatMessage>>;

    fn query_messages<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
        limit: usize,
        order: Order,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>>>;

    /// Creates the topic or raises its last-message time to `at`
    /// (never lowers it).
    fn upsert_topic<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Removes the topic and all its messages in one transaction.
    /// Returns the number of messages removed.
    fn delete_messages_and_topic<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<usize>>;

    /// Stores a question and its answer plus the topic bump atomically.
    fn record_exchange(
        &self,
        user: NewMessage,
        assistant: NewMessage,
    ) -> BoxFuture<'_, Result<(ChatMessage, ChatMessage)>>;

    /// Most recently active first.
    fn list_topics(&self, user_id: u64) -> BoxFuture<'_, Result<Vec<Topic>>>;

    fn ping(&self) -> BoxFuture<'_, Result<()>>;
}
