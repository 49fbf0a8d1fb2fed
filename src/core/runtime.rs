//! Task runtime command router.
//!
//! A single router task owns the [`TaskManager`]. Caller commands and runner
//! updates both arrive over channels and are applied one at a time, so task
//! state has exactly one writer.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use crate::core::config::AppConfig;
use crate::core::error_handling::{errors, HlsResult};
use crate::core::manager::{EventSender, TaskManager};
use crate::core::models::{TaskInfo, TaskRequest};
use crate::core::task_runner::{TaskServices, TaskUpdate};

/// Commands understood by the runtime router.
#[derive(Debug)]
pub enum RuntimeCommand {
    Submit {
        request: TaskRequest,
        respond_to: oneshot::Sender<HlsResult<String>>,
    },
    Status {
        task_id: String,
        respond_to: oneshot::Sender<HlsResult<TaskInfo>>,
    },
    List {
        respond_to: oneshot::Sender<Vec<TaskInfo>>,
    },
    Cancel {
        task_id: String,
        respond_to: oneshot::Sender<HlsResult<()>>,
    },
    Remove {
        task_id: String,
        respond_to: oneshot::Sender<HlsResult<TaskInfo>>,
    },
}

/// Cloneable handle to the router
#[derive(Clone)]
pub struct TaskRuntimeHandle {
    sender: mpsc::Sender<RuntimeCommand>,
}

impl TaskRuntimeHandle {
    pub fn new(sender: mpsc::Sender<RuntimeCommand>) -> Self {
        Self { sender }
    }

    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> HlsResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| errors::system("send runtime command", e.to_string()))?;
        rx.await
            .map_err(|_| errors::system("await runtime response", "task runtime dropped response"))
    }

    pub async fn submit(&self, request: TaskRequest) -> HlsResult<String> {
        self.send_command(|tx| RuntimeCommand::Submit {
            request,
            respond_to: tx,
        })
        .await?
    }

    pub async fn status(&self, task_id: impl Into<String>) -> HlsResult<TaskInfo> {
        let task_id = task_id.into();
        self.send_command(|tx| RuntimeCommand::Status {
            task_id,
            respond_to: tx,
        })
        .await?
    }

    pub async fn list(&self) -> HlsResult<Vec<TaskInfo>> {
        self.send_command(|tx| RuntimeCommand::List { respond_to: tx })
            .await
    }

    pub async fn cancel(&self, task_id: impl Into<String>) -> HlsResult<()> {
        let task_id = task_id.into();
        self.send_command(|tx| RuntimeCommand::Cancel {
            task_id,
            respond_to: tx,
        })
        .await?
    }

    pub async fn remove(&self, task_id: impl Into<String>) -> HlsResult<TaskInfo> {
        let task_id = task_id.into();
        self.send_command(|tx| RuntimeCommand::Remove {
            task_id,
            respond_to: tx,
        })
        .await?
    }
}

/// Spawn the router for `manager` on the current tokio runtime
pub fn spawn_task_runtime(mut manager: TaskManager) -> HlsResult<TaskRuntimeHandle> {
    let handle = Handle::try_current()
        .map_err(|e| errors::system("spawn task runtime", e.to_string()))?;
    let updates = manager
        .take_update_receiver()
        .ok_or_else(|| errors::system("spawn task runtime", "update receiver already taken"))?;

    let (tx, rx) = mpsc::channel(256);
    handle.spawn(router_loop(manager, rx, updates));
    info!("task runtime router spawned");

    Ok(TaskRuntimeHandle::new(tx))
}

/// Production wiring from configuration, with an optional event observer
pub fn spawn_from_config(
    config: &AppConfig,
    events: Option<EventSender>,
) -> HlsResult<TaskRuntimeHandle> {
    config
        .validate()
        .map_err(|e| errors::invalid_parameter("config", format!("{:#}", e)))?;

    let services = Arc::new(TaskServices::from_config(config)?);
    let mut manager = TaskManager::new(services, config.download.max_concurrent_tasks);
    if let Some(sender) = events {
        manager = manager.with_event_sender(sender);
    }
    spawn_task_runtime(manager)
}

async fn router_loop(
    mut manager: TaskManager,
    mut commands: mpsc::Receiver<RuntimeCommand>,
    mut updates: mpsc::UnboundedReceiver<TaskUpdate>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut manager, command),
                None => break,
            },
            Some(update) = updates.recv() => manager.apply_update(update),
        }
    }
    debug!("task runtime channel closed, exiting router loop");
}

#[instrument(skip_all)]
fn handle_command(manager: &mut TaskManager, command: RuntimeCommand) {
    match command {
        RuntimeCommand::Submit {
            request,
            respond_to,
        } => {
            let _ = respond_to.send(manager.submit(request));
        }
        RuntimeCommand::Status {
            task_id,
            respond_to,
        } => {
            let _ = respond_to.send(manager.status(&task_id));
        }
        RuntimeCommand::List { respond_to } => {
            let _ = respond_to.send(manager.list());
        }
        RuntimeCommand::Cancel {
            task_id,
            respond_to,
        } => {
            let _ = respond_to.send(manager.cancel(&task_id));
        }
        RuntimeCommand::Remove {
            task_id,
            respond_to,
        } => {
            let _ = respond_to.send(manager.remove(&task_id));
        }
    }
}
