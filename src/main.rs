//! # paperchat CLI
//!
//! Ask questions about a PDF from the terminal, or serve the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! paperchat --config ./config/paperchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `paperchat serve` | Start the HTTP server |
//! | `paperchat ingest <pdf>` | Run the ingestion pipeline and print counts |
//! | `paperchat chat <pdf>` | Ingest, then answer questions read from stdin |
//! | `paperchat summarize <pdf>` | Ingest, then print a whole-document summary |
//!
//! Logs go to stderr and are controlled with `RUST_LOG`
//! (default `paperchat=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use paperchat::config::{self, Config};
use paperchat::pipeline::Pipeline;
use paperchat::server;

/// Conversational question answering over PDF documents.
#[derive(Parser)]
#[command(
    name = "paperchat",
    version,
    about = "Conversational question answering over PDF documents",
    long_about = "paperchat partitions a PDF into text, tables, and images, summarizes \
    visually complex chunks, indexes everything for hybrid keyword + semantic retrieval with \
    cross-encoder reranking, and answers follow-up questions with per-session chat history."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the file does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/paperchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ingest a PDF and print the resulting document counts.
    Ingest {
        /// Path to the PDF.
        path: PathBuf,
    },

    /// Ingest a PDF, then answer questions read line by line from stdin.
    Chat {
        /// Path to the PDF.
        path: PathBuf,

        /// Session to converse in.
        #[arg(long)]
        session: Option<String>,
    },

    /// Ingest a PDF and print a map-reduce summary of it.
    Summarize {
        /// Path to the PDF.
        path: PathBuf,
    },
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

async fn ingest(pipeline: &Pipeline, path: &Path) -> Result<()> {
    let summary = pipeline.upload(path).await?;
    println!(
        "Ingested {}: {} documents, {} tables, {} images ({} pages, {} re-extracted)",
        path.display(),
        summary.documents,
        summary.tables,
        summary.images,
        summary.pages,
        summary.hi_res_pages
    );
    Ok(())
}

async fn chat_loop(pipeline: &Pipeline, session: Option<&str>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    print!("> ");
    stdout.flush()?;
    for line in stdin.lock().lines() {
        let question = line?;
        let question = question.trim();
        if question.is_empty() {
            print!("> ");
            stdout.flush()?;
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }
        let answer = pipeline.query(question, session).await;
        println!("{}\n", answer);
        print!("> ");
        stdout.flush()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paperchat=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_or_default(&cli.config)?;
    let pipeline = Pipeline::from_config(cfg)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(Arc::new(pipeline)).await?;
        }
        Commands::Ingest { path } => {
            ingest(&pipeline, &path).await?;
        }
        Commands::Chat { path, session } => {
            ingest(&pipeline, &path).await?;
            chat_loop(&pipeline, session.as_deref()).await?;
        }
        Commands::Summarize { path } => {
            ingest(&pipeline, &path).await?;
            println!("{}", pipeline.summarize().await?);
        }
    }

    Ok(())
}
