//! Task manager
//!
//! Owns the task table. It is driven by exactly one owner (the runtime router),
//! so none of its state is shared or locked: runners report back through the
//! update channel and the owner feeds those updates to [`TaskManager::apply_update`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error_handling::{errors, HlsResult};
use crate::core::models::{TaskEvent, TaskInfo, TaskMethod, TaskRequest, TaskStatus};
use crate::core::task_runner::{TaskPhase, TaskRunner, TaskServices, TaskUpdate};
use crate::utils::validation::validate_url;

/// Event channel for observers
pub type EventSender = mpsc::UnboundedSender<TaskEvent>;

pub struct TaskManager {
    services: Arc<TaskServices>,
    max_concurrent_tasks: usize,
    tasks: HashMap<String, TaskInfo>,
    cancel_flags: HashMap<String, Arc<AtomicBool>>,
    event_sender: Option<EventSender>,
    update_tx: mpsc::UnboundedSender<TaskUpdate>,
    update_rx: Option<mpsc::UnboundedReceiver<TaskUpdate>>,
}

impl TaskManager {
    pub fn new(services: Arc<TaskServices>, max_concurrent_tasks: usize) -> Self {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        Self {
            services,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            tasks: HashMap::new(),
            cancel_flags: HashMap::new(),
            event_sender: None,
            update_tx,
            update_rx: Some(update_rx),
        }
    }

    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Receiving end of runner updates; can be taken once by the owner
    pub fn take_update_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<TaskUpdate>> {
        self.update_rx.take()
    }

    fn emit(&self, event: TaskEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status.is_active()).count()
    }

    /// Admit a task and start its runner. Rejected outright when the active
    /// task limit is reached; nothing is queued.
    pub fn submit(&mut self, request: TaskRequest) -> HlsResult<String> {
        validate_request(&request)?;

        let active = self.active_count();
        if active >= self.max_concurrent_tasks {
            warn!(active, limit = self.max_concurrent_tasks, "rejecting task, limit reached");
            return Err(errors::task_limit_reached(self.max_concurrent_tasks));
        }

        let task_id = Uuid::new_v4().to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks
            .insert(task_id.clone(), TaskInfo::new(task_id.clone(), &request));
        self.cancel_flags.insert(task_id.clone(), cancelled.clone());

        info!(task_id = %task_id, source = %request.source, "task submitted");
        self.emit(TaskEvent::Created {
            task_id: task_id.clone(),
        });

        let runner = TaskRunner::new(
            task_id.clone(),
            request,
            self.services.clone(),
            cancelled,
            self.update_tx.clone(),
        );
        tokio::spawn(runner.run());

        Ok(task_id)
    }

    /// Fold a runner update into the task table. Updates for tasks that already
    /// reached a terminal state only refresh bookkeeping, never the status.
    pub fn apply_update(&mut self, update: TaskUpdate) {
        let Some(task) = self.tasks.get_mut(update.task_id()) else {
            debug!(task_id = update.task_id(), "update for unknown task ignored");
            return;
        };
        let terminal = task.status.is_terminal();
        task.updated_at = chrono::Utc::now();

        let event = match update {
            TaskUpdate::ScratchDir { path, .. } => {
                task.scratch_dir = Some(path);
                None
            }
            TaskUpdate::PhaseFinished { phase, elapsed, .. } => {
                match phase {
                    TaskPhase::Download => task.metrics.record_download(elapsed),
                    TaskPhase::Processing => task.metrics.record_processing(elapsed),
                }
                None
            }
            TaskUpdate::Progress { task_id, progress } => {
                task.metrics.record_progress(&progress);
                (!terminal).then_some(TaskEvent::Progress { task_id, progress })
            }
            _ if terminal => {
                debug!(task_id = %task.id, status = task.status.label(), "late update after terminal state ignored");
                None
            }
            TaskUpdate::Status { task_id, status } => {
                let changed = task.status.label() != status.label();
                task.status = status.clone();
                changed.then_some(TaskEvent::StatusChanged { task_id, status })
            }
            TaskUpdate::Completed {
                task_id,
                output_path,
            } => {
                task.status = TaskStatus::Completed;
                task.output_path = Some(output_path.clone());
                info!(task_id = %task_id, output = %output_path.display(), "task completed");
                Some(TaskEvent::Completed {
                    task_id,
                    output_path,
                })
            }
            TaskUpdate::Failed { task_id, error } => {
                task.status = TaskStatus::Failed {
                    error: error.clone(),
                };
                warn!(task_id = %task_id, code = error.code(), "task failed");
                Some(TaskEvent::Failed { task_id, error })
            }
        };

        if task.status.is_terminal() {
            let id = task.id.clone();
            self.cancel_flags.remove(&id);
        }
        if let Some(event) = event {
            self.emit(event);
        }
    }

    pub fn status(&self, task_id: &str) -> HlsResult<TaskInfo> {
        self.tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| errors::task_not_found(task_id))
    }

    /// Every known task, oldest first
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.start_time.cmp(&b.start_time).then(a.id.cmp(&b.id)));
        tasks
    }

    /// Mark a task cancelled and free its slot. In-flight network calls are left
    /// to finish on their own; the runner stops at its next checkpoint.
    pub fn cancel(&mut self, task_id: &str) -> HlsResult<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| errors::task_not_found(task_id))?;

        if task.status.is_terminal() {
            debug!(task_id, status = task.status.label(), "cancel on finished task ignored");
            return Ok(());
        }

        task.status = TaskStatus::Cancelled;
        task.updated_at = chrono::Utc::now();
        if let Some(flag) = self.cancel_flags.remove(task_id) {
            flag.store(true, Ordering::SeqCst);
        }

        info!(task_id, "task cancelled");
        self.emit(TaskEvent::Cancelled {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// Drop a finished task's record and hand it back
    pub fn remove(&mut self, task_id: &str) -> HlsResult<TaskInfo> {
        match self.tasks.get(task_id) {
            None => Err(errors::task_not_found(task_id)),
            Some(task) if task.status.is_active() => Err(errors::invalid_parameter(
                "task_id",
                format!("task {} is still {}", task_id, task.status.label()),
            )),
            Some(_) => self
                .tasks
                .remove(task_id)
                .ok_or_else(|| errors::task_not_found(task_id)),
        }
    }
}

fn validate_request(request: &TaskRequest) -> HlsResult<()> {
    if request.source.trim().is_empty() {
        return Err(errors::missing_parameter("source"));
    }
    if request.destination_dir.as_os_str().is_empty() {
        return Err(errors::missing_parameter("destination_dir"));
    }
    if request.method == TaskMethod::Remote {
        validate_url(&request.source)?;
    }
    Ok(())
}
