//! Service wiring and command handlers.
//!
//! Construction order: gateway, vector store, rag store, history store,
//! cache and queue, chat service.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chat_session::{
    ChatRequest, ChatService, ConversationCache, HistoryStore, LlmCompletion, MemoryHistoryStore,
    Order, SessionConfig, SqliteHistoryStore, WriteBackQueue,
};
use llm_gateway::LlmGateway;
use rag_store::{BarReporter, ContextBlock, GatewayEmbedder, RagConfig, RagStore, load_corpus};
use tracing::{info, warn};

use crate::cli::Commands;

pub struct App {
    gateway: Arc<LlmGateway>,
    rag: Arc<RagStore>,
    chat: ChatService,
}

impl App {
    pub fn build() -> Result<Self> {
        let gateway = Arc::new(LlmGateway::from_env().context("configuring model gateway")?);

        let rag_cfg = RagConfig::from_env().context("configuring vector store")?;
        let embedder = Arc::new(GatewayEmbedder::new(
            Arc::clone(&gateway),
            rag_cfg.embedding_dim,
        ));
        let rag = Arc::new(RagStore::new(rag_cfg, embedder).context("building rag store")?);

        let session_cfg = SessionConfig::from_env().context("configuring chat session")?;
        let history: Arc<dyn HistoryStore> = match &session_cfg.db_path {
            Some(path) => Arc::new(SqliteHistoryStore::open(path)?),
            None => {
                warn!("HISTORY_DB_PATH not set; chat history lives in memory only");
                Arc::new(MemoryHistoryStore::new())
            }
        };
        let cache = Arc::new(ConversationCache::new(session_cfg.cache_ttl));
        let queue = Arc::new(WriteBackQueue::new(
            session_cfg.writeback_queue,
            session_cfg.writeback_workers,
        ));
        let completion = Arc::new(LlmCompletion::new(Arc::clone(&gateway)));

        let chat = ChatService::new(session_cfg, history, cache, queue, completion)
            .with_context(rag.clone());

        info!("services ready");
        Ok(Self { gateway, rag, chat })
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Ingest { path, batch_size } => self.ingest(path, batch_size).await,
            Commands::Ask { question, top_k } => self.ask(&question, top_k).await,
            Commands::Chat {
                user,
                topic,
                message,
                no_context,
            } => {
                if !self.chat.is_ready().await {
                    bail!("chat history store is not reachable");
                }
                let mut req = ChatRequest::new(user, topic, message);
                req.use_context = !no_context;
                let reply = self.chat.chat(req).await?;
                if let Some(ctx) = &reply.context {
                    info!(documents = ctx.documents.len(), "answer grounded");
                }
                println!("{}", reply.answer.trim());
                Ok(())
            }
            Commands::History {
                user,
                topic,
                desc,
                limit,
            } => {
                let order = if desc { Order::Desc } else { Order::Asc };
                for m in self.chat.history(user, &topic, order, limit).await? {
                    println!(
                        "[{}] {}: {}",
                        m.created_at.format("%Y-%m-%d %H:%M:%S"),
                        m.role,
                        m.content
                    );
                }
                Ok(())
            }
            Commands::Topics { user } => {
                for t in self.chat.topics(user).await? {
                    println!("{}\t{}", t.last_message.to_rfc3339(), t.name);
                }
                Ok(())
            }
            Commands::Forget { user, topic } => {
                let removed = self.chat.delete_topic(user, &topic).await?;
                println!("deleted topic {topic:?} ({removed} messages)");
                Ok(())
            }
            Commands::Health => self.health().await,
        }
    }

    pub async fn shutdown(&self) {
        self.chat.shutdown().await;
    }

    async fn ingest(&self, path: std::path::PathBuf, batch_size: usize) -> Result<()> {
        let records = load_corpus(&path, &self.rag.config().fields)
            .with_context(|| format!("reading {}", path.display()))?;
        let reporter = Arc::new(BarReporter::new(records.len()));
        let report = self
            .rag
            .ingestor()
            .with_reporter(reporter)
            .ingest(records, batch_size)
            .await?;

        println!(
            "{} records in {} batches: {} stored, {} skipped, {} failed batches",
            report.total,
            report.batches,
            report.succeeded,
            report.skipped,
            report.failures.len()
        );
        for f in &report.failures {
            eprintln!("  {f}");
        }
        report.into_result()?;
        Ok(())
    }

    async fn ask(&self, question: &str, top_k: usize) -> Result<()> {
        let ctx = self.rag.build_context(question, top_k).await?;
        match &ctx.block {
            ContextBlock::Documents(text) => println!("{text}"),
            ContextBlock::NoMatches => println!("no matching documents"),
        }
        Ok(())
    }

    async fn health(&self) -> Result<()> {
        let mut healthy = true;
        for h in self.gateway.health().await {
            healthy &= h.ok;
            println!(
                "{:<10} {:<7} {} ({}) {}ms {}",
                h.role,
                if h.ok { "ok" } else { "FAIL" },
                h.provider,
                h.model,
                h.latency_ms,
                h.message
            );
        }
        let store_ok = self.rag.is_ready().await;
        let history_ok = self.chat.is_ready().await;
        println!("{:<10} {}", "vectors", if store_ok { "ok" } else { "FAIL" });
        println!("{:<10} {}", "history", if history_ok { "ok" } else { "FAIL" });

        if !(healthy && store_ok && history_ok) {
            bail!("one or more services are unavailable");
        }
        Ok(())
    }
}
