//! # Docuchat CLI
//!
//! Commands for initializing the conversation database, building the
//! knowledge-base index from a document, asking grounded questions, and
//! running the HTTP server.
//!
//! ```bash
//! docuchat init
//! docuchat build ./uploads/handbook.pdf
//! docuchat ask "What is the refund policy?" --thread demo
//! docuchat history demo
//! docuchat serve
//! ```
//!
//! All commands accept `--config` pointing to a TOML configuration file.

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use docuchat::builder::{BuildStatus, IndexBuilder};
use docuchat::chat::{AnswerEvent, ChatEngine};
use docuchat::config;
use docuchat::conversation::ConversationStore;
use docuchat::db;
use docuchat::embedding;
use docuchat::generation::OllamaGenerator;
use docuchat::migrate;
use docuchat::retrieve::Retriever;
use docuchat::server;

/// Docuchat: chat with your documents, answers grounded in what you indexed.
#[derive(Parser)]
#[command(
    name = "docuchat",
    about = "Document-grounded chat: background index builds plus retrieval-augmented streaming answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docuchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the conversation database schema. Idempotent.
    Init,

    /// Build (or extend) the knowledge-base index from a document.
    ///
    /// Supported types: .txt, .md, .pdf, .docx. Runs to completion in the
    /// foreground; the server exposes the same build as a background job.
    Build {
        /// Path to the document.
        path: PathBuf,
    },

    /// Ask a question and stream the grounded answer to stdout.
    Ask {
        /// The question.
        message: String,

        /// Conversation thread id; reuse one to keep context across turns.
        #[arg(long, default_value = "cli")]
        thread: String,
    },

    /// Print a thread's history in chronological order.
    History {
        /// Thread id.
        thread_id: String,

        #[arg(long, default_value_t = 50)]
        limit: i64,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// List threads, most recently active first.
    Threads,

    /// Start the HTTP server (SSE chat stream, build control, history).
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Build { path } => {
            let config = Arc::new(cfg);
            let embedder = embedding::create_embedder(&config.embedding)?;
            let builder = IndexBuilder::new(config.clone(), embedder);

            let state = builder.run_blocking(&path).await?;
            match state.status {
                BuildStatus::Ready => {
                    println!("build {}", path.display());
                    println!("  status: ready");
                    println!("  elapsed: {:.2}s", state.elapsed_seconds);
                    println!("  index: {}", config.storage.index_path.display());
                }
                other => {
                    anyhow::bail!("build finished with status {:?}", other);
                }
            }
        }
        Commands::Ask { message, thread } => {
            let config = Arc::new(cfg);
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            let store = ConversationStore::new(pool);

            let embedder = embedding::create_embedder(&config.embedding)?;
            let retriever = Arc::new(Retriever::new(
                config.storage.index_path.clone(),
                embedder,
                config.retrieval.top_k,
            ));
            let generator = Arc::new(OllamaGenerator::new(&config.generation));
            let engine = ChatEngine::new(store, retriever, generator);

            let mut rx = engine.stream_answer(&message, &thread).await?;
            let mut stdout = std::io::stdout();
            while let Some(event) = rx.recv().await {
                match event {
                    AnswerEvent::Token(text) => {
                        stdout.write_all(text.as_bytes())?;
                        stdout.flush()?;
                    }
                    AnswerEvent::Error(message) => {
                        eprintln!("\nerror: {}", message);
                    }
                }
            }
            println!();
        }
        Commands::History {
            thread_id,
            limit,
            offset,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let store = ConversationStore::new(pool);

            let history = store.list_messages(&thread_id, limit, offset).await?;
            if history.is_empty() {
                println!("No messages.");
            }
            for entry in history {
                println!("[{}] {}", entry.sender.as_str(), entry.text);
            }
        }
        Commands::Threads => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let store = ConversationStore::new(pool);

            let threads = store.list_threads_with_latest_title().await?;
            if threads.is_empty() {
                println!("No threads.");
            }
            for t in threads {
                println!("{}  {}", t.id, t.title);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
