//! In-process history store, for tests and runs without `HISTORY_DB_PATH`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

use crate::errors::Result;
use crate::message::{ChatMessage, NewMessage, Order, Topic};
use crate::store::HistoryStore;

#[derive(Default)]
struct State {
    next_id: i64,
    /// Per thread, in commit order.
    threads: BTreeMap<(u64, String), Vec<ChatMessage>>,
    topics: BTreeMap<(u64, String), Topic>,
}

impl State {
    fn bump_topic(&mut self, user_id: u64, topic: &str, at: DateTime<Utc>) {
        self.topics
            .entry((user_id, topic.to_string()))
            .and_modify(|t| t.last_message = t.last_message.max(at))
            .or_insert_with(|| Topic {
                user_id,
                name: topic.to_string(),
                last_message: at,
                created_at: at,
            });
    }

    fn commit_time(&self, user_id: u64, topic: &str) -> DateTime<Utc> {
        let now = Utc::now();
        self.threads
            .get(&(user_id, topic.to_string()))
            .and_then(|msgs| msgs.last())
            .map_or(now, |last| last.created_at.max(now))
    }

    fn push(&mut self, msg: NewMessage, at: DateTime<Utc>) -> ChatMessage {
        self.next_id += 1;
        let stored = ChatMessage {
            id: self.next_id,
            user_id: msg.user_id,
            topic: msg.topic,
            role: msg.role,
            model: msg.model,
            content: msg.content,
            created_at: at,
        };
        self.threads
            .entry((stored.user_id, stored.topic.clone()))
            .or_default()
            .push(stored.clone());
        stored
    }
}

#[derive(Default)]
pub struct MemoryHistoryStore {
    state: RwLock<State>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn create_message(&self, msg: NewMessage) -> BoxFuture<'_, Result<ChatMessage>> {
        async move {
            let mut st = self.state.write().await;
            let at = st.commit_time(msg.user_id, &msg.topic);
            st.bump_topic(msg.user_id, &msg.topic, at);
            Ok(st.push(msg, at))
        }
        .boxed()
    }

    fn query_messages<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
        limit: usize,
        order: Order,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>>> {
        async move {
            let st = self.state.read().await;
            let Some(msgs) = st.threads.get(&(user_id, topic.to_string())) else {
                return Ok(Vec::new());
            };
            let start = msgs.len().saturating_sub(limit);
            let mut window = msgs[start..].to_vec();
            if order == Order::Desc {
                window.reverse();
            }
            Ok(window)
        }
        .boxed()
    }

    fn upsert_topic<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.state.write().await.bump_topic(user_id, topic, at);
            Ok(())
        }
        .boxed()
    }

    fn delete_messages_and_topic<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<usize>> {
        async move {
            let mut st = self.state.write().await;
            let key = (user_id, topic.to_string());
            st.topics.remove(&key);
            Ok(st.threads.remove(&key).map_or(0, |m| m.len()))
        }
        .boxed()
    }

    fn record_exchange(
        &self,
        user: NewMessage,
        assistant: NewMessage,
    ) -> BoxFuture<'_, Result<(ChatMessage, ChatMessage)>> {
        async move {
            let mut st = self.state.write().await;
            let at = st.commit_time(user.user_id, &user.topic);
            st.bump_topic(user.user_id, &user.topic, at);
            let q = st.push(user, at);
            let a = st.push(assistant, at);
            Ok((q, a))
        }
        .boxed()
    }

    fn list_topics(&self, user_id: u64) -> BoxFuture<'_, Result<Vec<Topic>>> {
        async move {
            let st = self.state.read().await;
            let mut out: Vec<Topic> = st
                .topics
                .values()
                .filter(|t| t.user_id == user_id)
                .cloned()
                .collect();
            out.sort_by(|a, b| {
                b.last_message
                    .cmp(&a.last_message)
                    .then_with(|| a.name.cmp(&b.name))
            });
            Ok(out)
        }
        .boxed()
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        async { Ok(()) }.boxed()
    }
}
