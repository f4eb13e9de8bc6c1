//! Process-wide mapping from task id to controller (spec.md §4.8). The only
//! component an API layer would talk to; this crate has no API layer, so
//! the CLI binary plays that role in this repo.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crawlhub_core::{CrawlError, FetchConfig, Lifecycle, RecordStore, TaskConfig, TaskId};
use crawlhub_fetch::Fetcher;

use crate::controller::TaskController;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("task {0} already has a live controller")]
    AlreadyRunning(TaskId),
    #[error("no controller registered for task {0}")]
    NotFound(TaskId),
    #[error(transparent)]
    Controller(#[from] CrawlError),
}

pub struct EngineRegistry {
    controllers: DashMap<TaskId, Arc<TaskController>>,
    storage: Arc<dyn RecordStore>,
    fetcher: Arc<dyn Fetcher>,
    fetch_config: FetchConfig,
    user_agent: String,
}

impl EngineRegistry {
    pub fn new(
        storage: Arc<dyn RecordStore>,
        fetcher: Arc<dyn Fetcher>,
        fetch_config: FetchConfig,
        user_agent: String,
    ) -> Self {
        Self {
            controllers: DashMap::new(),
            storage,
            fetcher,
            fetch_config,
            user_agent,
        }
    }

    /// Refuses if a controller for this id is already `running`/`paused`.
    /// Otherwise constructs (first call) or reuses (restart) the
    /// controller and starts it — mapping 1:1 onto `POST /tasks/{id}/start`.
    pub async fn start_task(&self, config: TaskConfig) -> Result<Arc<TaskController>, RegistryError> {
        if let Some(existing) = self.get_controller(&config.id) {
            let lifecycle = existing.snapshot().await.lifecycle;
            if matches!(lifecycle, Lifecycle::Running | Lifecycle::Paused) {
                return Err(RegistryError::AlreadyRunning(config.id));
            }
            existing.start().await?;
            return Ok(existing);
        }

        let controller = TaskController::new(
            config,
            self.fetch_config.clone(),
            self.fetcher.clone(),
            self.storage.clone(),
            self.user_agent.clone(),
        )?;
        controller.start().await?;
        self.controllers.insert(controller.task_id().to_string(), controller.clone());
        Ok(controller)
    }

    pub fn get_controller(&self, task_id: &str) -> Option<Arc<TaskController>> {
        self.controllers.get(task_id).map(|e| e.value().clone())
    }

    /// Stops (best-effort) and removes a controller that failed to clean
    /// up on its own, freeing the task id for a fresh `start_task`.
    pub async fn force_cleanup(&self, task_id: &str) -> Result<(), RegistryError> {
        let Some((_, controller)) = self.controllers.remove(task_id) else {
            return Err(RegistryError::NotFound(task_id.to_string()));
        };
        let lifecycle = controller.snapshot().await.lifecycle;
        if matches!(lifecycle, Lifecycle::Running | Lifecycle::Paused) {
            let _ = controller.stop().await;
        }
        Ok(())
    }

    pub fn list_task_ids(&self) -> Vec<TaskId> {
        self.controllers.iter().map(|e| e.key().clone()).collect()
    }
}
