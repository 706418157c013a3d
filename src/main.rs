use groupchat_server::{
    admin::AdminSubsystem,
    ai::{http_backend::HttpAiBackend, AiBackend, AiParticipant},
    config::Config,
    db, error,
    files::LocalDiskBlobStore,
    group_engine::GroupEngine,
    logging,
    server::run,
    session::SessionRegistry,
    state::AppState,
    store::{postgres::PgStore, Store},
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(Config::from_env()?);

    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
    db::run_migrations(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    store.bootstrap(&cfg.bootstrap_admin_password).await?;

    let sessions = SessionRegistry::new(store.clone());
    let group_engine = Arc::new(GroupEngine::new(store.clone(), sessions.clone()));
    let admin = Arc::new(AdminSubsystem::new(store.clone(), group_engine.clone()));

    let ai_backend: Arc<dyn AiBackend> = Arc::new(HttpAiBackend::new(
        cfg.ai.base_url.clone(),
        cfg.ai.api_key.clone(),
        cfg.ai.model.clone(),
        Duration::from_secs(cfg.ai.request_timeout_secs),
    ));
    let ai = Arc::new(AiParticipant::new(
        cfg.ai.clone(),
        ai_backend,
        group_engine.clone(),
        store.clone(),
    ));

    tokio::fs::create_dir_all(&cfg.file_storage_root)
        .await
        .map_err(|e| error::AppError::StartServer(format!("file storage root: {e}")))?;
    let blobs = Arc::new(LocalDiskBlobStore::new(cfg.file_storage_root.clone()));

    let state = AppState {
        config: cfg.clone(),
        store,
        sessions,
        group_engine,
        admin,
        ai,
        blobs,
    };

    let addr = format!("{}:{}", cfg.listen_host, cfg.listen_port);
    run(state, &addr).await
}
