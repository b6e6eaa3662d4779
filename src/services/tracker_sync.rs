//! Tracker sync service - mirrors the approved plan into the issue tracker
//!
//! After plan approval, one tracker project is created for the run and one
//! tracker task per definition; the resulting live task list is the
//! orchestrator's scheduling view. Per-task creation failures are recorded
//! and the task still enters the live list without a tracker id, so a flaky
//! tracker never blocks execution.

use tracing::{info, warn};

use crate::api::providers::tracker::{TaskState, TaskUpdate, TrackerProvider};
use crate::state::SharedState;
use crate::tasks::{LiveTask, TaskStatus};

/// Result of a sync operation
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    /// Task ids that were created in the tracker
    pub created: Vec<String>,
    /// Task ids synced locally only (no tracker configured or creation failed)
    pub local_only: Vec<String>,
    /// Errors encountered while creating tracker tasks
    pub errors: Vec<String>,
}

impl SyncResult {
    /// Check if the sync was fully successful (no errors)
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get a summary message
    pub fn summary(&self) -> String {
        format!(
            "Created: {}, Local-only: {}, Errors: {}",
            self.created.len(),
            self.local_only.len(),
            self.errors.len()
        )
    }
}

/// Service for syncing the task plan to an issue tracker
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerSyncService;

impl TrackerSyncService {
    /// Build the live task list from the frozen definitions, creating a
    /// tracker project and per-task issues when a tracker is configured.
    pub async fn sync_plan(
        &self,
        tracker: Option<&dyn TrackerProvider>,
        state: &mut SharedState,
        project_name: &str,
    ) -> SyncResult {
        let mut result = SyncResult::default();
        let mut live_tasks: Vec<LiveTask> = state
            .task_definitions
            .iter()
            .cloned()
            .map(LiveTask::from_definition)
            .collect();

        let Some(tracker) = tracker else {
            info!("no tracker configured, skipping sync");
            for task in &mut live_tasks {
                if let Some(existing) = state.live_tasks.iter().find(|t| t.id() == task.id()) {
                    if existing.status == TaskStatus::CompletedSuccess {
                        task.status = existing.status;
                        task.attempts = existing.attempts;
                    }
                }
                result.local_only.push(task.id().to_string());
            }
            state.live_tasks = live_tasks;
            return result;
        };

        // One project per run, created on first sync only
        if state.tracker_project_id.is_none() {
            match tracker.create_project(project_name).await {
                Ok(project_id) => {
                    info!(project_id = %project_id, "created tracker project");
                    state.tracker_project_id = Some(project_id);
                }
                Err(e) => {
                    warn!("failed to create tracker project: {}", e);
                    result.errors.push(format!("project: {}", e));
                }
            }
        }

        if let Some(project_id) = state.tracker_project_id.clone() {
            for task in &mut live_tasks {
                // Re-planning re-syncs; keep ids and finished work from the
                // previous live view. Anything not successfully completed
                // gets a fresh start under the revised plan.
                if let Some(existing) = state.live_tasks.iter().find(|t| t.id() == task.id()) {
                    if existing.status == TaskStatus::CompletedSuccess {
                        task.status = existing.status;
                        task.attempts = existing.attempts;
                    }
                    if existing.tracker_id.is_some() {
                        task.tracker_id = existing.tracker_id.clone();
                        task.tracker_url = existing.tracker_url.clone();
                        result.created.push(task.id().to_string());
                        continue;
                    }
                }

                match tracker
                    .create_task(
                        &task.definition.name,
                        &task.definition.description,
                        &project_id,
                    )
                    .await
                {
                    Ok(created) => {
                        info!(task_id = %task.id(), tracker_id = %created.id, "created tracker task");
                        task.tracker_id = Some(created.id);
                        task.tracker_url = created.url;
                        result.created.push(task.id().to_string());
                    }
                    Err(e) => {
                        warn!(task_id = %task.id(), "failed to create tracker task: {}", e);
                        result.errors.push(format!("{}: {}", task.id(), e));
                        result.local_only.push(task.id().to_string());
                    }
                }
            }
        } else {
            for task in &live_tasks {
                result.local_only.push(task.id().to_string());
            }
        }

        state.live_tasks = live_tasks;
        result
    }

    /// Push a status transition for one task, best-effort.
    pub async fn push_status(
        &self,
        tracker: Option<&dyn TrackerProvider>,
        task: &LiveTask,
        new_state: TaskState,
    ) {
        let (Some(tracker), Some(tracker_id)) = (tracker, task.tracker_id.as_deref()) else {
            return;
        };

        if let Err(e) = tracker
            .update_task(tracker_id, TaskUpdate::state(new_state))
            .await
        {
            warn!(
                task_id = %task.id(),
                tracker_id = %tracker_id,
                "failed to push tracker status: {}",
                e
            );
        }
    }
}
