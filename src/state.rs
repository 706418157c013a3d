use crate::{
    admin::AdminSubsystem, ai::AiParticipant, config::Config, files::FileBlobStore,
    group_engine::GroupEngine, session::SessionRegistry, store::Store,
};
use std::sync::Arc;

/// All shared, constructed-at-startup resources, injected into every
/// handler. No global mutable state (`lazy_static`/`once_cell`) backs any of
/// these — they're built once in `main` and cloned (cheaply, via `Arc`) into
/// each connection worker.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub sessions: SessionRegistry,
    pub group_engine: Arc<GroupEngine>,
    pub admin: Arc<AdminSubsystem>,
    pub ai: Arc<AiParticipant>,
    pub blobs: Arc<dyn FileBlobStore>,
}
