use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rag_common::embedding::{EmbeddingGateway, FastEmbedder, OpenAiEmbedder};
use rag_common::generation::ChatGenerator;
use rag_common::openai::{OpenAiClient, OpenAiClientConfig};
use rag_common::vectordb::VectorDb;
use tax_rag::config::{Config, EmbeddingBackend};
use tax_rag::corpus::CorpusFile;
use tax_rag::pipeline::Pipeline;
use tax_rag::server;
use tax_rag::store::RuleStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting tax-rag server");

    // 1. Load config from environment
    let config = Config::from_env()?;
    info!(
        corpus_path = %config.corpus_path.display(),
        lancedb_path = %config.lancedb_path,
        collection = %config.collection_name,
        embedding_backend = ?config.embedding_backend,
        generation_model = %config.generation_model,
        min_similarity = ?config.min_similarity,
        "configuration loaded"
    );

    // 2. OpenAI-compatible client (generation, and embeddings when selected)
    let openai_config = OpenAiClientConfig::from_env();
    info!(
        base_url = %openai_config.base_url,
        timeout_secs = openai_config.timeout.map(|t| t.as_secs()),
        max_retries = openai_config.retry.max_retries,
        "openai-compatible client configured"
    );
    let openai = Arc::new(OpenAiClient::new(openai_config)?);

    // 3. Embedding model
    let embedder: Arc<dyn EmbeddingGateway> = match config.embedding_backend {
        EmbeddingBackend::FastEmbed => {
            info!("initializing embedding model (may download on first run)");
            Arc::new(FastEmbedder::new().await?)
        }
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::new(
            Arc::clone(&openai),
            config.embedding_model.clone(),
            config.embedding_dim,
        )),
    };
    info!(dimensions = embedder.dimensions(), "embedding model ready");

    // 4. Connect to LanceDB and open the rule collection
    let vectordb = Arc::new(VectorDb::connect(&config.lancedb_path).await?);
    let store = Arc::new(RuleStore::new(
        vectordb,
        config.collection_name.clone(),
        config.embedding_dim,
    ));
    store.ensure().await?;
    info!(rows = store.count().await?, "lancedb collection loaded");

    let generator = Arc::new(ChatGenerator::new(
        Arc::clone(&openai),
        config.generation_model.clone(),
    ));
    let pipeline = Arc::new(
        Pipeline::new(
            embedder,
            generator,
            store,
            CorpusFile::new(config.corpus_path.clone()),
        )?
        .with_min_similarity(config.min_similarity),
    );

    // 5. Replay corpus rules the store is missing
    if config.reconcile_on_start {
        match pipeline.reconcile().await {
            Ok(0) => {}
            Ok(n) => info!(inserted = n, "store reconciled with corpus"),
            Err(e) => warn!(error = %e, "reconcile failed, continuing with current store"),
        }
    }

    // 6. Serve HTTP
    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "HTTP server ready");
    server::serve(listener, pipeline).await?;
    info!("server shut down");
    Ok(())
}
