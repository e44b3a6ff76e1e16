use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use care_assist::api::{api_routes, serve};
use care_assist::classifier::{CrisisRules, LlmClassifier};
use care_assist::cli::run_repl;
use care_assist::config::{PipelineConfig, ServerConfig};
use care_assist::knowledge::{
    Embedder, EmbeddingConfig, EmbeddingIndex, HashingEmbedder, HttpEmbedder, HybridReranker, Ingestor,
    Reranker, load_dir,
};
use care_assist::llm::{LlmConfig, create_provider};
use care_assist::pipeline::{Orchestrator, OrchestratorDeps};
use care_assist::resources::ResourceDirectory;
use care_assist::store::LibSqlBackend;

/// Console logging, plus a daily rolling file when a log directory is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "care-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_config = ServerConfig::from_env()?;
    let _log_guard = init_tracing(server_config.log_dir.as_deref());

    let config = PipelineConfig::from_env()?;
    let llm_config = LlmConfig::from_env().context("LLM configuration")?;

    eprintln!("Care Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   API: http://0.0.0.0:{}/api/turn", server_config.port);
    eprintln!("   Region: {}", config.default_region);

    let llm = create_provider(&llm_config)?;

    // ── Database ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(&server_config.db_path)
            .await
            .with_context(|| format!("opening database at {}", server_config.db_path.display()))?,
    );

    let directory = match ResourceDirectory::load(db.as_ref(), &config.default_region).await {
        Ok(directory) => directory,
        Err(e) => {
            tracing::warn!("Resource table unreadable, using built-in helplines: {}", e);
            ResourceDirectory::builtin(&config.default_region)
        }
    };
    let directory = Arc::new(directory);

    // ── Knowledge ────────────────────────────────────────────────────────
    let embedder: Arc<dyn Embedder> = match EmbeddingConfig::from_env()? {
        Some(embedding_config) => {
            tracing::info!(model = %embedding_config.model, "Using HTTP embeddings");
            Arc::new(HttpEmbedder::new(embedding_config))
        }
        None => Arc::new(HashingEmbedder::new(HashingEmbedder::DEFAULT_DIMENSION)),
    };
    let index = Arc::new(EmbeddingIndex::new(embedder));
    let ingestor = Arc::new(Ingestor::new(index.clone(), db.clone()));

    match ingestor.load_persisted().await {
        Ok(count) => tracing::info!("Loaded {} stored passages", count),
        Err(e) => tracing::warn!("Stored passages not loaded: {}", e),
    }

    if let Some(dir) = &server_config.knowledge_dir {
        let documents = load_dir(dir)?;
        match ingestor.ingest(documents).await {
            Ok(count) => tracing::info!(dir = %dir.display(), "Ingested {} passages", count),
            Err(e) => tracing::warn!(dir = %dir.display(), "Knowledge ingestion failed: {}", e),
        }
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let classifier = Arc::new(LlmClassifier::new(llm.clone(), config.classifier_temperature));
    let reranker = config
        .rerank
        .then(|| Arc::new(HybridReranker::new()) as Arc<dyn Reranker>);
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        OrchestratorDeps {
            classifier,
            rules: CrisisRules::default_rules(),
            profiles: db.clone(),
            sessions: db.clone(),
            index,
            reranker,
            llm,
            directory,
        },
    ));

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = api_routes(orchestrator.clone(), ingestor, db.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server_config.port))
        .await
        .with_context(|| format!("binding port {}", server_config.port))?;
    let server = tokio::spawn(serve(listener, app, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    }));

    // Only an interactive terminal gets the REPL; the server keeps running
    // after it ends until Ctrl-C.
    if std::io::stdin().is_terminal() {
        run_repl(orchestrator).await;
        tracing::info!("CLI closed, HTTP server still running (Ctrl-C to stop)");
    } else {
        tracing::info!("stdin is not a terminal, serving HTTP only");
    }

    server
        .await
        .context("HTTP server task panicked")?
        .context("HTTP server stopped")?;
    tracing::info!("Server stopped");
    Ok(())
}
