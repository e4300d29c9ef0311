use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fundseek::cli;

#[derive(Parser)]
#[command(name = "fundseek")]
#[command(about = "Hybrid lexical + semantic retrieval engine for a mutual fund catalog", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the search index from a corpus file (CSV or JSON)
    Build {
        /// Corpus file path
        #[arg(short, long)]
        corpus: String,

        /// Output directory for the index artifacts
        #[arg(short, long)]
        output: String,

        /// Embedding backend: hash or mock
        #[arg(long, default_value = "hash")]
        backend: String,

        /// Embedding dimension
        #[arg(long, default_value = "384")]
        dimension: usize,
    },

    /// Search a built index with a natural-language query
    Search {
        /// Index directory
        #[arg(short, long)]
        index: String,

        /// Query text
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Print the full score breakdown per result
        #[arg(long)]
        explain: bool,

        /// Skip the embedding and dense legs (BM25 only)
        #[arg(long)]
        lexical_only: bool,

        /// Per-request deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Embedding backend: hash or mock
        #[arg(long, default_value = "hash")]
        backend: String,

        /// Embedding dimension
        #[arg(long, default_value = "384")]
        dimension: usize,
    },

    /// Print the advisor prompt built from the top matches
    Prompt {
        /// Index directory
        #[arg(short, long)]
        index: String,

        /// Query text
        query: String,

        /// Embedding backend: hash or mock
        #[arg(long, default_value = "hash")]
        backend: String,

        /// Embedding dimension
        #[arg(long, default_value = "384")]
        dimension: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("fundseek=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            corpus,
            output,
            backend,
            dimension,
        } => cli::build(corpus, output, backend, dimension).await,
        Commands::Search {
            index,
            query,
            k,
            explain,
            lexical_only,
            timeout_ms,
            backend,
            dimension,
        } => {
            cli::search(
                index,
                query,
                k,
                explain,
                lexical_only,
                timeout_ms,
                backend,
                dimension,
            )
            .await
        }
        Commands::Prompt {
            index,
            query,
            backend,
            dimension,
        } => cli::prompt(index, query, backend, dimension).await,
    }
}
