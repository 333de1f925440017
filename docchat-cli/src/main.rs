//! docchat - ingest documents and ask questions about them
//!
//! # Commands
//!
//! ```bash
//! # Index files into the default index
//! docchat ingest handbook.txt refunds.txt
//!
//! # Ask a one-off question
//! docchat ask "What is the refund policy?"
//!
//! # Raw similarity search, restricted to one file type
//! docchat search "refund" -k 5 --file-type .txt
//!
//! # Interactive chat keeping one session
//! docchat chat
//! ```

mod repl;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use docchat_rag::{
    ChatEngine, ChatEngineBuilder, HashingEmbeddingProvider, InMemoryVectorStore, MetadataFilter,
    RagConfig,
};
use docchat_telemetry::{TelemetryConfig, init_telemetry};
use tracing::warn;

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Chat with your business documents")]
#[command(version)]
struct Cli {
    /// Path of the persisted index
    #[arg(long, global = true, env = "DOCCHAT_INDEX", default_value = "docchat-index.json")]
    index: PathBuf,

    /// Embedding backend
    #[arg(long, global = true, value_enum, default_value_t = EmbedderKind::Hashing)]
    embedder: EmbedderKind,

    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Offline feature-hashing embeddings
    Hashing,
    /// OpenAI embeddings API (requires the `openai` feature)
    Openai,
}

#[derive(Subcommand)]
enum Commands {
    /// Index one or more files
    Ingest {
        /// Files to index
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ask a single question. Sessions live only as long as the process, so
    /// use `chat` for follow-up questions.
    Ask { message: String },

    /// Show the passages most similar to a query
    Search {
        query: String,

        /// Number of results to return
        #[arg(short, long, default_value = "3")]
        k: usize,

        /// Only search one document
        #[arg(long)]
        document: Option<String>,

        /// Only search one file type, e.g. `.pdf`
        #[arg(long)]
        file_type: Option<String>,
    },

    /// List indexed documents
    List,

    /// Remove a document and all of its chunks
    Remove { document_id: String },

    /// Remove every document
    Purge {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show index statistics
    Stats,

    /// Start an interactive chat
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = TelemetryConfig::default().with_json(cli.json_logs).with_default_filter("warn");
    if let Err(e) = init_telemetry(&telemetry) {
        eprintln!("logging already initialized: {e}");
    }

    let engine = build_engine(&cli.index, cli.embedder).await?;

    match cli.command {
        Commands::Ingest { files } => ingest(&engine, &files, cli.json).await,

        Commands::Ask { message } => {
            let reply = engine.ask(&message, None).await.map_err(user_error)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("{}\n", reply.response);
                if !reply.sources.is_empty() {
                    let sources: Vec<&str> = reply.sources.iter().map(String::as_str).collect();
                    println!("Sources: {}", sources.join(", "));
                }
            }
            Ok(())
        }

        Commands::Search { query, k, document, file_type } => {
            let mut filter = MetadataFilter::default();
            if let Some(document) = document {
                filter = filter.document_id(document);
            }
            if let Some(file_type) = file_type {
                filter = filter.file_type(file_type.to_ascii_lowercase());
            }
            let results = engine.search(&query, k, Some(&filter)).await.map_err(user_error)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
                return Ok(());
            }
            if results.is_empty() {
                println!("No matching passages.");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "--- {} [{:.3}] {} #{} ---",
                    rank + 1,
                    result.score,
                    result.metadata.filename,
                    result.metadata.chunk_index
                );
                let preview: String = result.content.chars().take(200).collect();
                println!(
                    "{}{}\n",
                    preview,
                    if result.content.chars().count() > 200 { "..." } else { "" }
                );
            }
            Ok(())
        }

        Commands::List => {
            let documents = engine.list_documents().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&documents)?);
                return Ok(());
            }
            if documents.is_empty() {
                println!("No documents indexed.");
            }
            for doc in documents {
                println!(
                    "{}  {}  {} chunks  {} bytes  {}",
                    doc.document_id,
                    doc.metadata.filename,
                    doc.chunk_count,
                    doc.metadata.byte_size,
                    doc.metadata.uploaded_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }

        Commands::Remove { document_id } => {
            if engine.remove_document(&document_id).await? {
                println!("Removed {document_id}");
                Ok(())
            } else {
                bail!("document {document_id} not found")
            }
        }

        Commands::Purge { yes } => {
            if !yes && !repl::confirm("Remove every indexed document?")? {
                println!("Aborted.");
                return Ok(());
            }
            let removed = engine.purge().await?;
            println!("Removed {removed} chunks");
            Ok(())
        }

        Commands::Stats => {
            let stats = engine.stats().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Documents:   {}", stats.document_count);
                println!("Chunks:      {}", stats.chunk_count);
                println!("Content:     {} bytes", stats.content_bytes);
                println!("Answer mode: {}", stats.answer_mode);
                if let Some(dimension) = stats.dimension {
                    println!("Dimension:   {dimension}");
                }
            }
            Ok(())
        }

        Commands::Chat => repl::run(&engine).await,
    }
}

async fn build_engine(index: &Path, embedder: EmbedderKind) -> Result<ChatEngine> {
    let config = RagConfig::from_env().context("invalid DOCCHAT_* configuration")?;
    let store = InMemoryVectorStore::open(index)
        .await
        .with_context(|| format!("failed to open index {}", index.display()))?;

    let builder = ChatEngine::builder().config(config).vector_store(Arc::new(store));
    let builder = with_backends(builder, embedder)?;
    Ok(builder.build().await?)
}

#[cfg(feature = "openai")]
fn with_backends(builder: ChatEngineBuilder, embedder: EmbedderKind) -> Result<ChatEngineBuilder> {
    use docchat_rag::openai::{OpenAIChatGenerator, OpenAIEmbeddingProvider};

    let builder = match embedder {
        EmbedderKind::Hashing => {
            builder.embedding_provider(Arc::new(HashingEmbeddingProvider::default()))
        }
        EmbedderKind::Openai => builder.embedding_provider(Arc::new(OpenAIEmbeddingProvider::from_env()?)),
    };
    Ok(match OpenAIChatGenerator::from_env() {
        Ok(generator) => builder.generator(Arc::new(generator)),
        Err(e) => {
            warn!(error = %e, "generation disabled");
            builder
        }
    })
}

#[cfg(not(feature = "openai"))]
fn with_backends(builder: ChatEngineBuilder, embedder: EmbedderKind) -> Result<ChatEngineBuilder> {
    if embedder == EmbedderKind::Openai {
        bail!("OpenAI embeddings need a build with `--features openai`");
    }
    warn!("built without the `openai` feature, answering extractively");
    Ok(builder.embedding_provider(Arc::new(HashingEmbeddingProvider::default())))
}

async fn ingest(engine: &ChatEngine, files: &[PathBuf], json: bool) -> Result<()> {
    let mut reports = Vec::new();
    let mut failed = 0;
    for path in files {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("{} is not a file path", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        match engine.ingest_file(&bytes, filename).await {
            Ok(report) => {
                if !json {
                    println!(
                        "Indexed {} as {} ({} chunks)",
                        filename,
                        report.document_id,
                        report.chunk_count()
                    );
                }
                reports.push(report);
            }
            Err(e) => {
                warn!(filename, error = %e, "ingestion failed");
                eprintln!("{filename}: {}", e.user_message());
                failed += 1;
            }
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failed > 0 {
        bail!("{failed} of {} files could not be indexed", files.len());
    }
    Ok(())
}

/// Report a rejected request by its caller-facing message.
fn user_error(err: docchat_rag::RagError) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_takes_only_a_message() {
        let cli = Cli::try_parse_from(["docchat", "ask", "What is the refund policy?"]).unwrap();
        assert!(matches!(cli.command, Commands::Ask { message } if message == "What is the refund policy?"));
        assert!(Cli::try_parse_from(["docchat", "ask", "refunds?", "--session", "abc"]).is_err());
    }
}
