pub mod execution_handlers;
pub mod health_handlers;

use crate::services::{
    execution_store::ExecutionStore, scheduler::StatusHandle, staging_service::StagingStore,
};

/// State shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub executions: ExecutionStore,
    pub staging: StagingStore,
    pub status: StatusHandle,
}

#[cfg(test)]
pub(crate) async fn test_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState {
        executions: crate::services::execution_store::memory_store().await,
        staging: StagingStore::open(dir.path()).await.unwrap(),
        status: StatusHandle::default(),
    };
    (dir, state)
}
