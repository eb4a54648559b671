use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::app::{NovelSyncError, Result};
use crate::crawler::CrawlOrchestrator;
use crate::domain::{CrawlTask, ProxyConfig, TaskStatus};

/// Sent to success observers once per successfully processed novel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSuccess {
    pub task_id: String,
    pub site_id: String,
    pub novel_id: String,
    pub title: String,
    /// A previous successful crawl existed, so this is an update, not a new book
    pub already_exists: bool,
    pub new_chapters: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    pub active: usize,
    pub finished: usize,
    pub total: usize,
}

type StatusObserver = Arc<dyn Fn(&CrawlTask) + Send + Sync>;
type SuccessObserver = Arc<dyn Fn(&CrawlSuccess) + Send + Sync>;

enum Notification {
    Status(CrawlTask),
    Success(CrawlSuccess),
}

#[derive(Default)]
struct Observers {
    status: Mutex<Vec<StatusObserver>>,
    success: Mutex<Vec<SuccessObserver>>,
}

struct Shared {
    tasks: Mutex<HashMap<String, CrawlTask>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    stop_requests: Mutex<HashSet<String>>,
    notify_tx: mpsc::UnboundedSender<Notification>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn notify(&self, notification: Notification) {
        if self.notify_tx.send(notification).is_err() {
            debug!("Notification dispatcher has shut down");
        }
    }

    /// Applies `f` to the task and publishes the resulting snapshot.
    fn modify<R>(&self, task_id: &str, f: impl FnOnce(&mut CrawlTask) -> R) -> Option<R> {
        let (result, snapshot) = {
            let mut tasks = lock(&self.tasks);
            let task = tasks.get_mut(task_id)?;
            let result = f(task);
            (result, task.clone())
        };
        self.notify(Notification::Status(snapshot));
        Some(result)
    }
}

/// In-memory table of crawl tasks.
///
/// Each submitted task runs as one spawned Tokio task whose handle is kept
/// here for `join`. Observers are called from a separate dispatcher task so
/// a slow observer never stalls a crawl. Must be created inside a Tokio
/// runtime.
pub struct TaskRegistry {
    shared: Arc<Shared>,
    observers: Arc<Observers>,
    orchestrator: Arc<CrawlOrchestrator>,
}

impl TaskRegistry {
    pub fn new(orchestrator: Arc<CrawlOrchestrator>) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let observers = Arc::new(Observers::default());
        tokio::spawn(dispatch(notify_rx, observers.clone()));

        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
                stop_requests: Mutex::new(HashSet::new()),
                notify_tx,
            }),
            observers,
            orchestrator,
        }
    }

    /// Creates a `Pending` task and starts its single background execution.
    pub fn submit(&self, site_id: &str, novel_ids: Vec<String>, proxy: ProxyConfig) -> String {
        let task = CrawlTask::new(site_id.to_string(), novel_ids, proxy);
        let task_id = task.id.clone();
        info!(task_id = %task_id, site_id, total = task.total, "Submitted crawl task");

        lock(&self.shared.tasks).insert(task_id.clone(), task.clone());
        self.shared.notify(Notification::Status(task));

        let control = TaskControl {
            task_id: task_id.clone(),
            shared: self.shared.clone(),
        };
        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move { orchestrator.run(control).await });
        lock(&self.shared.handles).insert(task_id.clone(), handle);

        task_id
    }

    /// Requests cooperative cancellation. A pending task stops at once; a
    /// running one stops before its next novel. Returns false for unknown or
    /// already finished tasks.
    pub fn stop(&self, task_id: &str) -> bool {
        // Checked and changed under one lock; `begin` and `finish` take it too.
        let snapshot = {
            let mut tasks = lock(&self.shared.tasks);
            let Some(task) = tasks.get_mut(task_id) else {
                return false;
            };
            match task.status {
                TaskStatus::Pending => {
                    task.transition(TaskStatus::Stopped);
                    info!(task_id, "Pending task stopped");
                    task.clone()
                }
                TaskStatus::Running => {
                    lock(&self.shared.stop_requests).insert(task_id.to_string());
                    info!(task_id, "Stop requested");
                    return true;
                }
                _ => return false,
            }
        };
        self.shared.notify(Notification::Status(snapshot));
        true
    }

    pub fn get_task(&self, task_id: &str) -> Option<CrawlTask> {
        lock(&self.shared.tasks).get(task_id).cloned()
    }

    pub fn list_active(&self) -> Vec<CrawlTask> {
        let mut active: Vec<CrawlTask> = lock(&self.shared.tasks)
            .values()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        active
    }

    pub fn summary(&self) -> RegistrySummary {
        let tasks = lock(&self.shared.tasks);
        let active = tasks.values().filter(|t| t.status.is_active()).count();
        RegistrySummary {
            active,
            finished: tasks.len() - active,
            total: tasks.len(),
        }
    }

    pub fn register_status_observer<F>(&self, observer: F)
    where
        F: Fn(&CrawlTask) + Send + Sync + 'static,
    {
        lock(&self.observers.status).push(Arc::new(observer));
    }

    pub fn register_success_observer<F>(&self, observer: F)
    where
        F: Fn(&CrawlSuccess) + Send + Sync + 'static,
    {
        lock(&self.observers.success).push(Arc::new(observer));
    }

    /// Waits for the task's execution to finish and returns its final state.
    pub async fn join(&self, task_id: &str) -> Result<CrawlTask> {
        let handle = lock(&self.shared.handles).remove(task_id);
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| NovelSyncError::Other(format!("crawl task {} panicked: {}", task_id, e)))?;
        }
        self.get_task(task_id)
            .ok_or_else(|| NovelSyncError::TaskNotFound(task_id.to_string()))
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Notification>, observers: Arc<Observers>) {
    while let Some(notification) = rx.recv().await {
        match notification {
            Notification::Status(task) => {
                let current: Vec<StatusObserver> = lock(&observers.status).clone();
                for observer in current {
                    observer(&task);
                }
            }
            Notification::Success(success) => {
                let current: Vec<SuccessObserver> = lock(&observers.success).clone();
                for observer in current {
                    observer(&success);
                }
            }
        }
    }
}

/// The orchestrator's view of the task it is running.
#[derive(Clone)]
pub struct TaskControl {
    task_id: String,
    shared: Arc<Shared>,
}

impl TaskControl {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn snapshot(&self) -> Option<CrawlTask> {
        lock(&self.shared.tasks).get(&self.task_id).cloned()
    }

    /// Pending -> Running. False if the task was stopped before it started.
    pub fn begin(&self) -> bool {
        self.transition(TaskStatus::Running, None)
    }

    /// Whether a stop was requested. Checked before each novel.
    pub fn stop_requested(&self) -> bool {
        lock(&self.shared.stop_requests).contains(&self.task_id)
    }

    /// Applies `f` while the task is active. Finished tasks are left as is.
    pub fn update(&self, f: impl FnOnce(&mut CrawlTask)) {
        self.shared.modify(&self.task_id, |task| {
            if task.status.is_active() {
                f(task);
            }
        });
    }

    /// Running -> Completed, or Stopped when a stop was requested.
    pub fn finish(&self) -> TaskStatus {
        let shared = &self.shared;
        let task_id = &self.task_id;
        shared
            .modify(task_id, |task| {
                let next = if lock(&shared.stop_requests).remove(task_id) {
                    TaskStatus::Stopped
                } else {
                    TaskStatus::Completed
                };
                task.transition(next);
                task.status
            })
            .unwrap_or(TaskStatus::Completed)
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        lock(&self.shared.stop_requests).remove(&self.task_id);
        self.transition(TaskStatus::Failed, Some(error.into()))
    }

    pub fn notify_success(&self, success: CrawlSuccess) {
        self.shared.notify(Notification::Success(success));
    }

    fn transition(&self, next: TaskStatus, error: Option<String>) -> bool {
        let moved = self
            .shared
            .modify(&self.task_id, |task| {
                let moved = task.transition(next);
                if moved && error.is_some() {
                    task.error_message = error;
                }
                moved
            })
            .unwrap_or(false);
        if !moved {
            debug!(task_id = %self.task_id, to = next.as_str(), "Ignored task transition");
        }
        moved
    }
}
