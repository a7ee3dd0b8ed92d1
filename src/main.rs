//! # SOP Harness CLI (`sop`)
//!
//! Command-line front end for the SOP index: build and refresh the index,
//! query it, and start the HTTP or MCP servers.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sop index` | Build the index if it is not built yet |
//! | `sop refresh` | Clear and rebuild the index from the corpus |
//! | `sop search "<query>"` | Ranked SOP fragments for a query |
//! | `sop guidance "<situation>"` | Evidence and recommendation for a situation |
//! | `sop categories` | Indexed and on-disk categories |
//! | `sop category <name>` | Documents indexed under one category |
//! | `sop status` | Index state and configuration as JSON |
//! | `sop serve mcp` | MCP server on stdio |
//! | `sop serve http` | JSON HTTP API on `[server].bind` |
//!
//! ## Examples
//!
//! ```bash
//! sop --config ./config/sop.toml refresh
//! sop search "forklift battery charging" --category Safety --limit 3
//! sop guidance "a chemical spill in the warehouse"
//! RUST_LOG=sop_harness=debug sop serve mcp
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sop_harness::config::{self, DEFAULT_CONFIG_PATH};
use sop_harness::tools::ToolContext;
use sop_harness::{mcp, server};

/// SOP Harness: semantic search over standard operating procedures.
#[derive(Parser)]
#[command(
    name = "sop",
    about = "SOP Harness: category-aware semantic search over standard operating procedures",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// When the default path does not exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index, or adopt a persisted one, if it is not ready yet.
    Index,

    /// Clear the collection and rebuild it from the corpus.
    Refresh,

    /// Search SOP documents.
    Search {
        query: String,

        /// Maximum number of results. Defaults to `[retrieval].default_max_results`.
        #[arg(long)]
        limit: Option<usize>,

        /// Restrict results to one category (exact folder name).
        #[arg(long)]
        category: Option<String>,
    },

    /// Gather SOP guidance for a situation.
    Guidance {
        situation: String,

        #[arg(long)]
        category: Option<String>,
    },

    /// List categories with document and chunk counts.
    Categories,

    /// List the documents indexed under a category.
    Category { name: String },

    /// Print index status as JSON.
    Status,

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// MCP over stdin/stdout, for agent hosts that launch a subprocess.
    Mcp,
    /// JSON HTTP API bound to `[server].bind`.
    Http,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is reserved for command output and MCP frames.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;
    let retriever = sop_harness::open(&cfg).await?;

    match cli.command {
        Commands::Index => {
            retriever.indexer().ensure_ready().await?;
            print_report(&retriever.list_categories());
        }
        Commands::Refresh => {
            let report = retriever.refresh().await?;
            println!(
                "Indexed {} documents ({} chunks).",
                report.documents_indexed, report.chunks_indexed
            );
            if report.empty_corpus {
                println!("Corpus is empty: {}", cfg.corpus.root.display());
            }
            for skipped in &report.skipped {
                println!("  skipped {}: {}", skipped.path, skipped.reason);
            }
        }
        Commands::Search {
            query,
            limit,
            category,
        } => {
            let limit = limit.unwrap_or_else(|| retriever.default_max_results());
            let results = retriever.search(&query, limit, category.as_deref()).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for r in &results {
                println!(
                    "{}. [{:.3}] {} / {}",
                    r.rank, r.similarity, r.category, r.document_name
                );
                println!("    path: {}", r.source_path);
                println!("    excerpt: \"{}\"", excerpt(&r.content, 240));
                println!();
            }
        }
        Commands::Guidance {
            situation,
            category,
        } => {
            let guidance = retriever.guidance(&situation, category.as_deref()).await?;
            if !guidance.evidence.is_empty() {
                println!("{}", guidance.evidence);
                println!();
            }
            println!("{}", guidance.recommendation);
        }
        Commands::Categories => {
            print_report(&retriever.list_categories());
        }
        Commands::Category { name } => {
            let docs = retriever.get_by_category(&name).await?;
            if docs.is_empty() {
                println!("No documents in category '{}'.", name);
            }
            for d in &docs {
                println!(
                    "{:<40} {:>6} chunks {:>9} bytes  {}",
                    d.name, d.chunks, d.size_bytes, d.source_path
                );
            }
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&retriever.status())?);
        }
        Commands::Serve { service } => {
            let ctx = ToolContext::new(retriever);
            match service {
                ServeService::Mcp => mcp::run_stdio(ctx).await?,
                ServeService::Http => server::run_server(&cfg.server.bind, ctx).await?,
            }
        }
    }

    Ok(())
}

fn print_report(listing: &sop_harness::retriever::CategoryListing) {
    println!("{:<24} {:>10} {:>8}  ON DISK", "CATEGORY", "DOCUMENTS", "CHUNKS");
    for c in &listing.categories {
        println!(
            "{:<24} {:>10} {:>8}  {}",
            c.name,
            c.documents,
            c.chunks,
            if c.on_disk { "yes" } else { "no" }
        );
    }
    println!();
    println!(
        "state: {}  documents: {}  chunks: {}",
        listing.state, listing.total_documents, listing.total_chunks
    );
    if let Some(err) = &listing.last_error {
        println!("last error: {}", err);
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat.to_string(),
    }
}
