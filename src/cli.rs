use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(
    about = "Ingest a JSONL corpus into a vector store and chat over it",
    long_about = "Throttled corpus ingestion, retrieval-grounded answers and per-topic chat history. \
Settings come from the environment (optionally a .env file)."
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Debug logs for the workspace crates
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Embed and store a JSONL corpus
    Ingest {
        /// Path to the .jsonl file
        path: PathBuf,
        /// Records per batch
        #[arg(short, long, default_value_t = 10)]
        batch_size: usize,
    },
    /// Show the reference documents retrieved for a question
    Ask {
        question: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },
    /// Send one message in a topic and print the answer
    Chat {
        #[arg(short, long, env = "CHAT_USER_ID", default_value_t = 1)]
        user: u64,
        #[arg(short, long)]
        topic: String,
        message: String,
        /// Answer without retrieved documents
        #[arg(long)]
        no_context: bool,
    },
    /// Print the stored messages of a topic
    History {
        #[arg(short, long, env = "CHAT_USER_ID", default_value_t = 1)]
        user: u64,
        #[arg(short, long)]
        topic: String,
        /// Newest first
        #[arg(long)]
        desc: bool,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List a user's topics, most recently active first
    #[command(visible_alias = "ls")]
    Topics {
        #[arg(short, long, env = "CHAT_USER_ID", default_value_t = 1)]
        user: u64,
    },
    /// Delete a topic and all its messages
    Forget {
        #[arg(short, long, env = "CHAT_USER_ID", default_value_t = 1)]
        user: u64,
        #[arg(short, long)]
        topic: String,
    },
    /// Probe the model endpoints, vector store and history store
    Health,
}
