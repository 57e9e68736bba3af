//! SQLite-backed history store.
//!
//! One connection behind a mutex, WAL journal, foreign keys on. Every call
//! runs on the blocking pool. Timestamps are stored as UTC microseconds and
//! assigned inside the write transaction, never earlier than the newest
//! message of the same thread.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use rusqlite::{Connection, Transaction, params};
use tracing::{debug, info};

use crate::errors::{Result, SessionError};
use crate::message::{ChatMessage, NewMessage, Order, Topic};
use crate::store::HistoryStore;

pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteHistoryStore {
    /// Opens (or creates) the database file and its schema.
    ///
    /// # Errors
    /// I/O errors creating the parent directory, SQLite errors opening it.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        info!("Opening chat history at: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path),
        })
    }

    /// Private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| SessionError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| SessionError::Worker(e.to_string()))?
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    debug!("Initializing chat history schema");
    conn.execute_batch("PRAGMA journal_mode = WAL")?;
    conn.execute_batch("PRAGMA foreign_keys = ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_topics (
            user_id INTEGER NOT NULL,
            topic TEXT NOT NULL,
            last_message INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, topic)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            topic TEXT NOT NULL,
            role TEXT NOT NULL,
            model TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (user_id, topic)
                REFERENCES chat_topics(user_id, topic) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chat_messages_thread
            ON chat_messages(user_id, topic, created_at, id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_chat_topics_recent
            ON chat_topics(user_id, last_message)",
        [],
    )?;
    Ok(())
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| SessionError::Corrupt(format!("timestamp out of range: {micros}")))
}

/// Commit timestamp for a new message in the thread.
fn next_timestamp(tx: &Transaction<'_>, user_id: u64, topic: &str) -> Result<i64> {
    let newest: Option<i64> = tx.query_row(
        "SELECT MAX(created_at) FROM chat_messages WHERE user_id = ?1 AND topic = ?2",
        params![user_id as i64, topic],
        |row| row.get(0),
    )?;
    let now = Utc::now().timestamp_micros();
    Ok(newest.map_or(now, |n| n.max(now)))
}

fn upsert_topic_tx(tx: &Transaction<'_>, user_id: u64, topic: &str, at: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO chat_topics (user_id, topic, last_message, created_at)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(user_id, topic)
         DO UPDATE SET last_message = MAX(last_message, excluded.last_message)",
        params![user_id as i64, topic, at],
    )?;
    Ok(())
}

fn insert_message_tx(tx: &Transaction<'_>, msg: NewMessage, at: i64) -> Result<ChatMessage> {
    tx.execute(
        "INSERT INTO chat_messages (user_id, topic, role, model, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            msg.user_id as i64,
            msg.topic,
            msg.role.as_str(),
            msg.model,
            msg.content,
            at
        ],
    )?;
    Ok(ChatMessage {
        id: tx.last_insert_rowid(),
        user_id: msg.user_id,
        topic: msg.topic,
        role: msg.role,
        model: msg.model,
        content: msg.content,
        created_at: from_micros(at)?,
    })
}

type RawMessage = (i64, i64, String, String, String, String, i64);

fn decode_message(raw: RawMessage) -> Result<ChatMessage> {
    let (id, user_id, topic, role, model, content, created_at) = raw;
    Ok(ChatMessage {
        id,
        user_id: user_id as u64,
        topic,
        role: role.parse()?,
        model,
        content,
        created_at: from_micros(created_at)?,
    })
}

impl HistoryStore for SqliteHistoryStore {
    fn create_message(&self, msg: NewMessage) -> BoxFuture<'_, Result<ChatMessage>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let at = next_timestamp(&tx, msg.user_id, &msg.topic)?;
            upsert_topic_tx(&tx, msg.user_id, &msg.topic, at)?;
            let stored = insert_message_tx(&tx, msg, at)?;
            tx.commit()?;
            Ok(stored)
        })
        .boxed()
    }

    fn query_messages<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
        limit: usize,
        order: Order,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>>> {
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, topic, role, model, content, created_at
                 FROM chat_messages
                 WHERE user_id = ?1 AND topic = ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![user_id as i64, topic, limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?;

            let mut out = Vec::new();
            for raw in rows {
                out.push(decode_message(raw?)?);
            }
            if order == Order::Asc {
                out.reverse();
            }
            Ok(out)
        })
        .boxed()
    }

    fn upsert_topic<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<()>> {
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            upsert_topic_tx(&tx, user_id, &topic, at.timestamp_micros())?;
            tx.commit()?;
            Ok(())
        })
        .boxed()
    }

    fn delete_messages_and_topic<'a>(
        &'a self,
        user_id: u64,
        topic: &'a str,
    ) -> BoxFuture<'a, Result<usize>> {
        let topic = topic.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM chat_messages WHERE user_id = ?1 AND topic = ?2",
                params![user_id as i64, topic],
            )?;
            tx.execute(
                "DELETE FROM chat_topics WHERE user_id = ?1 AND topic = ?2",
                params![user_id as i64, topic],
            )?;
            tx.commit()?;
            debug!(user_id, %topic, removed, "topic deleted");
            Ok(removed)
        })
        .boxed()
    }

    fn record_exchange(
        &self,
        user: NewMessage,
        assistant: NewMessage,
    ) -> BoxFuture<'_, Result<(ChatMessage, ChatMessage)>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let at = next_timestamp(&tx, user.user_id, &user.topic)?;
            upsert_topic_tx(&tx, user.user_id, &user.topic, at)?;
            let q = insert_message_tx(&tx, user, at)?;
            let a = insert_message_tx(&tx, assistant, at)?;
            tx.commit()?;
            Ok((q, a))
        })
        .boxed()
    }

    fn list_topics(&self, user_id: u64) -> BoxFuture<'_, Result<Vec<Topic>>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT topic, last_message, created_at
                 FROM chat_topics
                 WHERE user_id = ?1
                 ORDER BY last_message DESC, topic ASC",
            )?;
            let rows = stmt.query_map(params![user_id as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (name, last, created) = row?;
                out.push(Topic {
                    user_id,
                    name,
                    last_message: from_micros(last)?,
                    created_at: from_micros(created)?,
                });
            }
            Ok(out)
        })
        .boxed()
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .boxed()
    }
}
