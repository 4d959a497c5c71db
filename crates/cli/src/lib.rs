use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use context_lexical::LexicalIndexHandle;
use context_protocol::{ChatHistoryStore, ConversationTurn, Document, InMemoryHistory};
use context_search::{RetrievalConfig, RetrievalEngine};

mod generator;
mod report;
mod semantic;
mod sources;

pub use generator::PromptPreview;
pub use semantic::HttpSemanticRetriever;
pub use sources::{parse_corpus, FileCorpus, FileHistory};

#[derive(Parser)]
#[command(name = "context-rag")]
#[command(about = "Hybrid retrieval and context assembly for grounded answers", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve and pack context for a query, then render the grounded prompt
    Query(QueryArgs),

    /// Build the lexical index over a corpus and print its statistics
    #[command(name = "index-stats")]
    IndexStats(IndexStatsArgs),

    /// Validate a configuration file and print the effective settings
    #[command(name = "check-config")]
    CheckConfig(ConfigArgs),

    /// Print the JSON schema of an input file format
    Schema(SchemaArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Retrieval configuration (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct QueryArgs {
    /// The user query
    query: String,

    /// Corpus file (.json array or .jsonl)
    #[arg(long)]
    corpus: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,

    /// Chat transcripts keyed by session id
    #[arg(long)]
    history: Option<PathBuf>,

    /// Session whose recent turns drive topic continuity
    #[arg(long, default_value = "default")]
    session: String,

    /// HTTP endpoint of the semantic retriever; lexical-only when omitted
    #[arg(long)]
    semantic_url: Option<String>,

    /// Print the full response as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct IndexStatsArgs {
    /// Corpus file (.json array or .jsonl)
    #[arg(long)]
    corpus: PathBuf,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Copy, Clone, ValueEnum)]
enum SchemaKind {
    Document,
    Turn,
}

#[derive(Args)]
struct SchemaArgs {
    #[arg(value_enum)]
    kind: SchemaKind,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Query(args) => run_query(args).await,
        Commands::IndexStats(args) => run_index_stats(args).await,
        Commands::CheckConfig(args) => run_check_config(args),
        Commands::Schema(args) => run_schema(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<RetrievalConfig> {
    match path {
        Some(path) => RetrievalConfig::load(path)
            .with_context(|| format!("Invalid configuration {}", path.display())),
        None => Ok(RetrievalConfig::default()),
    }
}

async fn build_index(
    config: &RetrievalConfig,
    corpus: &FileCorpus,
) -> Result<LexicalIndexHandle> {
    let handle = LexicalIndexHandle::new(config.lexical.index.clone())?;
    handle
        .rebuild(corpus)
        .await
        .with_context(|| format!("Failed to index {}", corpus.path().display()))?;
    Ok(handle)
}

async fn run_query(args: QueryArgs) -> Result<()> {
    let config = load_config(args.config.config.as_deref())?;
    let corpus = FileCorpus::new(&args.corpus);
    let handle = build_index(&config, &corpus).await?;

    let mut engine = RetrievalEngine::new(&config, Arc::new(handle))?;
    if let Some(url) = &args.semantic_url {
        engine = engine.with_semantic(Arc::new(HttpSemanticRetriever::new(url.clone())?));
    }

    let history: Box<dyn ChatHistoryStore> = match &args.history {
        Some(path) => Box::new(FileHistory::new(path)),
        None => Box::new(InMemoryHistory::new()),
    };
    let response = engine
        .respond(history.as_ref(), &PromptPreview, &args.session, &args.query)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", report::render_response(&response));
    }
    Ok(())
}

async fn run_index_stats(args: IndexStatsArgs) -> Result<()> {
    let config = load_config(args.config.config.as_deref())?;
    let corpus = FileCorpus::new(&args.corpus);
    let handle = build_index(&config, &corpus).await?;
    println!("{}", serde_json::to_string_pretty(&handle.snapshot().stats())?);
    Ok(())
}

fn run_check_config(args: ConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{rendered}");
    log::info!("Configuration is valid");
    Ok(())
}

fn run_schema(args: SchemaArgs) -> Result<()> {
    let schema = match args.kind {
        SchemaKind::Document => schemars::schema_for!(Document),
        SchemaKind::Turn => schemars::schema_for!(ConversationTurn),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
