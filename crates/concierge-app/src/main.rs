//! Concierge application binary - composition root.
//!
//! Ties the Concierge crates into a single executable:
//! 1. Resolve configuration (CLI > env > TOML file > defaults)
//! 2. Open the conversation and catalog databases, seed the catalog
//! 3. Build the similarity backend and ingest the FAQ knowledge base
//! 4. Wire classifier, handlers and conversation store into the router
//! 5. Start the retention sweep and the axum API server

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use concierge_api::state::AppState;
use concierge_chat::{
    DefaultHandler, DialogueRouter, FaqHandler, HandlerRegistry, ProductHandler, RouterSettings,
    SmallTalkHandler,
};
use concierge_core::config::ConciergeConfig;
use concierge_intent::{
    EmbeddingSimilarity, LexicalSimilarity, LlmContextualClassifier, ReferentialContextClassifier,
    RouteSet, SemanticRouter, SimilarityBackend, TwoTierClassifier,
};
use concierge_llm::{ChatCompletionClient, OpenAiCompatibleClient};
use concierge_storage::{
    ConversationStore, Database, InMemoryConversationStore, ProductCatalog, RetentionPolicy,
    SqliteConversationStore,
};
use concierge_vector::{
    load_faq_file, DynEmbeddingService, KnowledgeBase, OnnxEmbeddingService, TermHashEmbedding,
};

use cli::CliArgs;

/// Expand ~ to home directory in a path string.
fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

/// Apply CLI and environment overrides on top of the file configuration.
fn apply_overrides(args: &CliArgs, config: &mut ConciergeConfig) {
    if let Some(host) = args.resolve_host() {
        config.server.host = host;
    }
    config.server.port = args.resolve_port(config.server.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    if let Some(store) = args.resolve_store() {
        config.store.backend = store;
    }
    config.llm.api_key = args.resolve_api_key(config.llm.api_key.take());
}

/// Embedder shared by the fast tier and the knowledge base. `None` means
/// the lexical backend was selected or the ONNX model could not be loaded.
fn load_embedder(config: &ConciergeConfig) -> Option<Arc<dyn DynEmbeddingService>> {
    if config.classifier.similarity_backend != "onnx" {
        return None;
    }
    let Some(dir) = config.classifier.embedding_model_dir.as_deref() else {
        tracing::warn!("ONNX backend selected without embedding_model_dir; using lexical");
        return None;
    };
    match OnnxEmbeddingService::from_directory(&expand_home(dir)) {
        Ok(service) => {
            tracing::info!(dir, "ONNX embedding model loaded");
            Some(Arc::new(service))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load ONNX model; using lexical");
            None
        }
    }
}

async fn build_similarity(
    embedder: Option<&Arc<dyn DynEmbeddingService>>,
    routes: &RouteSet,
) -> Arc<dyn SimilarityBackend> {
    if let Some(embedder) = embedder {
        let backend = EmbeddingSimilarity::new(Arc::clone(embedder));
        match backend.initialize(routes).await {
            Ok(()) => return Arc::new(backend),
            Err(e) => tracing::warn!(error = %e, "Failed to embed routes; using lexical"),
        }
    }
    Arc::new(LexicalSimilarity::new(routes))
}

fn build_classifier(
    config: &ConciergeConfig,
    fast: SemanticRouter,
    client: &OpenAiCompatibleClient,
) -> TwoTierClassifier {
    if !config.classifier.fallback_enabled {
        tracing::info!("Contextual classifier disabled");
        return TwoTierClassifier::fast_only(fast);
    }
    if client.has_api_key() {
        let llm: Arc<dyn ChatCompletionClient> = Arc::new(client.clone());
        let contextual = LlmContextualClassifier::new(llm, config.llm.classifier_model.clone())
            .with_history_window(config.chat.history_window);
        TwoTierClassifier::new(fast, Arc::new(contextual))
    } else {
        tracing::warn!("No completion API key; contextual tier uses referential matching");
        let contextual = ReferentialContextClassifier::new(fast.clone());
        TwoTierClassifier::new(fast, Arc::new(contextual))
    }
}

async fn build_knowledge_base(
    config: &ConciergeConfig,
    embedder: Arc<dyn DynEmbeddingService>,
) -> Result<KnowledgeBase, Box<dyn std::error::Error>> {
    let knowledge = KnowledgeBase::new(embedder);
    match config.faq.data_file.as_deref() {
        Some(file) => {
            let entries = load_faq_file(&expand_home(file))?;
            knowledge.ingest(&entries).await?;
        }
        None => tracing::warn!("No FAQ data file configured; FAQ answers come from the model only"),
    }
    Ok(knowledge)
}

fn build_catalog(
    config: &ConciergeConfig,
    db: Arc<Database>,
) -> Result<ProductCatalog, Box<dyn std::error::Error>> {
    let catalog = ProductCatalog::new(db, config.catalog.max_rows);
    if let Some(file) = config.catalog.seed_file.as_deref() {
        catalog.seed_from_file(&expand_home(file))?;
    }
    tracing::info!(products = catalog.count()?, "Product catalog ready");
    Ok(catalog)
}

fn build_store(config: &ConciergeConfig, db: Arc<Database>) -> Arc<dyn ConversationStore> {
    let retention = RetentionPolicy::from_config(&config.store);
    match config.store.backend.as_str() {
        "sqlite" => {
            tracing::info!("Conversation store: sqlite");
            Arc::new(SqliteConversationStore::new(db, retention))
        }
        other => {
            if other != "memory" {
                tracing::warn!(backend = other, "Unknown store backend; using memory");
            }
            tracing::info!("Conversation store: memory");
            Arc::new(InMemoryConversationStore::new(retention))
        }
    }
}

/// Periodically evict idle conversations.
fn spawn_sweeper(store: Arc<dyn ConversationStore>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.tick().await;
        loop {
            interval.tick().await;
            match store.sweep(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Expired idle conversations"),
                Err(e) => tracing::warn!(error = %e, "Conversation sweep failed"),
            }
        }
    });
}

fn open_database(
    data_dir: &Path,
    file_name: &str,
) -> Result<Arc<Database>, Box<dyn std::error::Error>> {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join(file_name);
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    Ok(Arc::new(db))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = if config_exists {
        ConciergeConfig::load_or_default(&config_file)
    } else {
        ConciergeConfig::default()
    };
    apply_overrides(&args, &mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Concierge v{}", env!("CARGO_PKG_VERSION"));
    if config_exists {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No configuration file; using defaults");
    }

    let data_dir = expand_home(&config.general.data_dir);
    // Generated catalog queries never share a connection with conversations.
    let db = open_database(&data_dir, "concierge.db")?;
    let catalog = build_catalog(&config, open_database(&data_dir, "catalog.db")?)?;

    let routes = RouteSet::default_routes();
    let embedder = load_embedder(&config);
    let similarity = build_similarity(embedder.as_ref(), &routes).await;
    let fast = SemanticRouter::new(similarity, config.classifier.thresholds.clone());
    tracing::info!(
        utterances = routes.utterance_count(),
        backend = %config.classifier.similarity_backend,
        "Fast classifier ready"
    );

    let kb_embedder = embedder.unwrap_or_else(|| {
        tracing::info!("FAQ retrieval uses word overlap; no embedding model loaded");
        Arc::new(TermHashEmbedding::new())
    });
    let knowledge = Arc::new(build_knowledge_base(&config, kb_embedder).await?);

    let client = OpenAiCompatibleClient::from_config(&config.llm);
    let classifier = build_classifier(&config, fast, &client);
    let llm: Arc<dyn ChatCompletionClient> = Arc::new(client);

    let handlers = HandlerRegistry::new(
        Arc::new(FaqHandler::new(
            knowledge,
            Arc::clone(&llm),
            config.llm.faq_model.clone(),
            config.faq.n_results,
            config.faq.cache_capacity,
        )
        .with_min_score(config.faq.min_score)),
        Arc::new(ProductHandler::new(
            catalog,
            Arc::clone(&llm),
            config.llm.sql_model.clone(),
            config.chat.history_window,
            config.catalog.summary_rows,
        )),
        Arc::new(SmallTalkHandler::new(
            llm,
            config.llm.small_talk_model.clone(),
            config.chat.history_window,
        )),
        Arc::new(DefaultHandler),
    );

    let store = build_store(&config, db);
    spawn_sweeper(Arc::clone(&store), config.store.sweep_interval_secs);

    let router = DialogueRouter::new(
        store,
        classifier,
        handlers,
        RouterSettings::from_config(&config.chat),
    );
    tracing::info!(?router, "Dialogue router ready");

    let state = AppState::new(config.clone(), router);
    if let Err(e) = concierge_api::start_server(&config, state).await {
        tracing::error!(error = %e, "API server stopped");
        return Err(e.into());
    }

    Ok(())
}
