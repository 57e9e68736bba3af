//! Chat service: cached history reads, RAG-grounded answers, durable writes.
//!
//! Durable history is the system of record. The cache is only ever filled
//! from it, asynchronously, through the write-back queue.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use llm_gateway::LlmGateway;
use rag_store::{RagError, RagStore, RetrievedContext};
use tracing::{debug, info, instrument, trace, warn};

use crate::cache::{ConversationCache, Generation};
use crate::config::{HISTORY_CEILING, SessionConfig};
use crate::errors::{Result, SessionError};
use crate::message::{ChatMessage, NewMessage, Order, Role, Topic};
use crate::prompt::build_prompt;
use crate::store::HistoryStore;
use crate::writeback::WriteBackQueue;

/// Text completion backend.
pub trait CompletionProvider: Send + Sync {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>>;

    /// Model name recorded on stored messages.
    fn model(&self) -> &str;
}

/// [`CompletionProvider`] over the gateway's completion role.
pub struct LlmCompletion {
    gateway: Arc<LlmGateway>,
}

impl LlmCompletion {
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway }
    }
}

impl CompletionProvider for LlmCompletion {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        async move { Ok(self.gateway.complete(prompt).await?) }.boxed()
    }

    fn model(&self) -> &str {
        &self.gateway.completion_config().model
    }
}

/// Source of reference documents for a question.
pub trait ContextSource: Send + Sync {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
    ) -> BoxFuture<'a, std::result::Result<RetrievedContext, RagError>>;
}

impl ContextSource for RagStore {
    fn retrieve<'a>(
        &'a self,
        query: &'a str,
        top_k: usize,
    ) -> BoxFuture<'a, std::result::Result<RetrievedContext, RagError>> {
        self.build_context(query, top_k).boxed()
    }
}

#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub user_id: u64,
    pub topic: String,
    pub content: String,
    /// Ground the answer in retrieved documents.
    pub use_context: bool,
}

impl ChatRequest {
    pub fn new(user_id: u64, topic: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id,
            topic: topic.into(),
            content: content.into(),
            use_context: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatReply {
    pub answer: String,
    /// Window the prompt was built from, oldest first.
    pub history: Vec<ChatMessage>,
    /// `None` when retrieval was skipped or failed.
    pub context: Option<RetrievedContext>,
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
}

pub struct ChatService {
    cfg: SessionConfig,
    history: Arc<dyn HistoryStore>,
    cache: Arc<ConversationCache>,
    queue: Arc<WriteBackQueue>,
    completion: Arc<dyn CompletionProvider>,
    context: Option<Arc<dyn ContextSource>>,
}

impl ChatService {
    pub fn new(
        cfg: SessionConfig,
        history: Arc<dyn HistoryStore>,
        cache: Arc<ConversationCache>,
        queue: Arc<WriteBackQueue>,
        completion: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            cfg,
            history,
            cache,
            queue,
            completion,
            context: None,
        }
    }

    pub fn with_context(mut self, source: Arc<dyn ContextSource>) -> Self {
        self.context = Some(source);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &Arc<ConversationCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<WriteBackQueue> {
        &self.queue
    }

    /// Recent window for a thread, oldest first.
    ///
    /// Served from the cache while fresh; otherwise read from durable
    /// history and handed to the write-back queue.
    ///
    /// # Errors
    /// Durable store failures only; cache problems fall through to storage.
    pub async fn recent_history(&self, user_id: u64, topic: &str) -> Result<Vec<ChatMessage>> {
        let entry = self.cache.load(user_id, topic).await;
        if ConversationCache::is_valid(entry.as_ref(), self.cfg.cache_max_age) {
            if let Some(entry) = entry {
                trace!(user_id, topic, count = entry.count, "history cache hit");
                return Ok(entry.messages);
            }
        }

        let seen = self.cache.generation(user_id, topic).await;
        let window = self
            .history
            .query_messages(user_id, topic, self.cfg.window(), Order::Asc)
            .await?;
        debug!(user_id, topic, count = window.len(), "history cache miss");
        if !window.is_empty() {
            self.schedule_save(user_id, topic, window.clone(), seen);
        }
        Ok(window)
    }

    /// Answers one user turn and records it.
    ///
    /// Nothing is stored when completion fails. Retrieval failures only
    /// drop the reference section.
    ///
    /// # Errors
    /// [`SessionError::Invalid`] for an empty topic or message, completion
    /// and durable store failures.
    #[instrument(skip_all, fields(user_id = req.user_id, topic = %req.topic))]
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatReply> {
        let topic = req.topic.trim();
        let content = req.content.trim();
        if topic.is_empty() {
            return Err(SessionError::Invalid("topic must not be empty".into()));
        }
        if content.is_empty() {
            return Err(SessionError::Invalid("message must not be empty".into()));
        }

        let history = self.recent_history(req.user_id, topic).await?;

        let context = match (&self.context, req.use_context) {
            (Some(source), true) => match source.retrieve(content, self.cfg.context_top_k).await {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    warn!(error = %e, "retrieval failed; answering without context");
                    None
                }
            },
            _ => None,
        };

        let prompt = build_prompt(content, &history, context.as_ref().map(|c| &c.block));
        trace!(chars = prompt.len(), "prompt assembled");
        let answer = self.completion.complete(&prompt).await?;

        let model = self.completion.model().to_string();
        let (user_message, assistant_message) = self
            .history
            .record_exchange(
                NewMessage {
                    user_id: req.user_id,
                    topic: topic.to_string(),
                    role: Role::User,
                    model: model.clone(),
                    content: content.to_string(),
                },
                NewMessage {
                    user_id: req.user_id,
                    topic: topic.to_string(),
                    role: Role::Assistant,
                    model,
                    content: answer.clone(),
                },
            )
            .await?;

        self.schedule_refresh(req.user_id, topic);
        info!(
            user_message = user_message.id,
            assistant_message = assistant_message.id,
            "exchange recorded"
        );

        Ok(ChatReply {
            answer,
            history,
            context,
            user_message,
            assistant_message,
        })
    }

    /// Durable history of a thread, at most `limit` (capped at the ceiling)
    /// most recent messages.
    pub async fn history(
        &self,
        user_id: u64,
        topic: &str,
        order: Order,
        limit: Option<usize>,
    ) -> Result<Vec<ChatMessage>> {
        let limit = limit.unwrap_or(HISTORY_CEILING).min(HISTORY_CEILING);
        self.history
            .query_messages(user_id, topic, limit, order)
            .await
    }

    pub async fn topics(&self, user_id: u64) -> Result<Vec<Topic>> {
        self.history.list_topics(user_id).await
    }

    /// Removes a topic with its messages, then its cache entry.
    ///
    /// Pending write-backs are flushed first so none can re-insert the
    /// deleted window.
    pub async fn delete_topic(&self, user_id: u64, topic: &str) -> Result<usize> {
        let removed = self
            .history
            .delete_messages_and_topic(user_id, topic)
            .await?;
        self.queue.flush().await;
        self.cache.delete(user_id, topic).await;
        info!(user_id, topic, removed, "topic deleted");
        Ok(removed)
    }

    pub async fn is_ready(&self) -> bool {
        match self.history.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "history store not ready");
                false
            }
        }
    }

    /// Drains outstanding cache writes.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    fn schedule_save(
        &self,
        user_id: u64,
        topic: &str,
        window: Vec<ChatMessage>,
        seen: Generation,
    ) {
        let cache = Arc::clone(&self.cache);
        let topic = topic.to_string();
        self.queue.enqueue(
            format!("save chat:{user_id}:{topic}"),
            async move {
                cache.save_window(user_id, &topic, window, seen).await?;
                Ok(())
            }
            .boxed(),
        );
    }

    fn schedule_refresh(&self, user_id: u64, topic: &str) {
        let cache = Arc::clone(&self.cache);
        let history = Arc::clone(&self.history);
        let limit = self.cfg.window();
        let topic = topic.to_string();
        self.queue.enqueue(
            format!("refresh chat:{user_id}:{topic}"),
            async move {
                let seen = cache.generation(user_id, &topic).await;
                let window = history
                    .query_messages(user_id, &topic, limit, Order::Asc)
                    .await?;
                if !window.is_empty() {
                    cache.save_window(user_id, &topic, window, seen).await?;
                }
                Ok(())
            }
            .boxed(),
        );
    }
}
