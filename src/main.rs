use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use book_searcher::api;
use book_searcher::config::{self, AppConfig};
use book_searcher::search::{
    Compression, FileSource, GenerationStore, RecordSource, SearchQuery, SearchService,
};
use book_searcher::state::AppState;

#[derive(Parser)]
#[command(name = "book-searcher")]
#[command(about = "Full-text search over a book catalog")]
#[command(version)]
struct Cli {
    /// Path to config.json, created with defaults if missing
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the index directory from the config
    #[arg(long, global = true)]
    index_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Run {
        /// Listen address, e.g. 0.0.0.0:7070
        #[arg(long)]
        bind: Option<String>,
    },

    /// Build a new index generation from source files
    Index {
        /// Source file(s): .csv / .jsonl, optionally .lz4 or .zst compressed
        #[arg(short, long, required = true)]
        file: Vec<String>,

        /// Record store compressor: none, lz4 or zstd
        #[arg(short, long)]
        compressor: Option<String>,
    },

    /// Run a free-text query against the current index
    Query {
        text: String,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "book_searcher=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration / 加载配置
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut app_config = config::load_config(&config_path).map_err(anyhow::Error::msg)?;
    if let Some(dir) = cli.index_dir {
        app_config.index.dir = dir;
    }
    config::init_config(app_config).map_err(anyhow::Error::msg)?;
    let app_config = config::config();

    match cli.command {
        Commands::Run { bind } => run_server(&app_config, bind).await,
        Commands::Index { file, compressor } => run_index(&app_config, file, compressor).await,
        Commands::Query { text, limit, offset } => run_query(&app_config, text, limit, offset).await,
    }
}

fn open_service(app_config: &AppConfig) -> SearchService {
    let generations = GenerationStore::new(app_config.get_index_dir(), app_config.index.keep_generations);
    SearchService::new(generations, app_config.planner(), app_config.build_options())
}

async fn run_server(app_config: &AppConfig, bind: Option<String>) -> anyhow::Result<()> {
    let service = Arc::new(open_service(app_config));

    // Load the serving generation / 加载当前索引
    if let Err(e) = service.open_current() {
        tracing::error!("Failed to load index, searches fail until a rebuild: {}", e);
    }

    let state = Arc::new(AppState::new(service, app_config));
    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind_addr = bind.unwrap_or_else(|| app_config.get_bind_address());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_index(app_config: &AppConfig, files: Vec<String>, compressor: Option<String>) -> anyhow::Result<()> {
    let compressor = compressor.map(|c| c.parse::<Compression>()).transpose()?;
    let mut sources: Vec<Box<dyn RecordSource>> = Vec::with_capacity(files.len());
    for file in &files {
        sources.push(Box::new(FileSource::detect(file)?));
    }

    let service = open_service(app_config);
    let report = tokio::task::spawn_blocking(move || service.rebuild(&sources, compressor)).await??;

    for failed in &report.failed_sources {
        tracing::warn!("Source {} failed: {}", failed.name, failed.error);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_query(app_config: &AppConfig, text: String, limit: Option<i64>, offset: i64) -> anyhow::Result<()> {
    let service = Arc::new(open_service(app_config));
    if !service.open_current()? {
        bail!("no index in {:?}, run `book-searcher index` first", app_config.get_index_dir());
    }

    let limit = limit.unwrap_or(app_config.search.default_limit);
    let query = SearchQuery::new_query(text, limit, offset);
    let timeout = std::time::Duration::from_millis(app_config.search.timeout_ms);
    let result = service.search_with_timeout(query, timeout).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
