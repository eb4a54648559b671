use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Legal moves of the task state machine. Terminal states are absorbing.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Stopped)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }
}

/// Proxy settings handed through to the site parser untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub url: Option<String>,
}

impl ProxyConfig {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            url: Some(url.into()),
        }
    }

    pub fn active_url(&self) -> Option<&str> {
        if self.enabled {
            self.url.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: String,
    pub site_id: String,
    pub novel_ids: Vec<String>,
    pub proxy: ProxyConfig,
    pub status: TaskStatus,
    pub progress: usize,
    pub total: usize,
    pub current_novel_id: Option<String>,
    pub success_count: usize,
    pub failed_count: usize,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CrawlTask {
    pub fn new(site_id: String, novel_ids: Vec<String>, proxy: ProxyConfig) -> Self {
        let total = novel_ids.len();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            site_id,
            novel_ids,
            proxy,
            status: TaskStatus::Pending,
            progress: 0,
            total,
            current_novel_id: None,
            success_count: 0,
            failed_count: 0,
            error_message: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Applies a status change if the state machine allows it, stamping the
    /// start or end time. Returns false when the move was rejected.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        let now = Utc::now();
        if next == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> CrawlTask {
        CrawlTask::new("site".into(), vec!["a".into(), "b".into()], ProxyConfig::default())
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = task();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.total, 2);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = task();
        assert!(task.transition(TaskStatus::Running));
        assert!(task.started_at.is_some());
        assert!(task.transition(TaskStatus::Completed));
        assert!(task.ended_at.is_some());
    }

    #[test]
    fn test_terminal_states_absorb() {
        for terminal in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Stopped] {
            let mut task = task();
            task.transition(TaskStatus::Running);
            assert!(task.transition(terminal));
            for next in [
                TaskStatus::Pending,
                TaskStatus::Running,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Stopped,
            ] {
                assert!(!task.transition(next));
                assert_eq!(task.status, terminal);
            }
        }
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut task = task();
        assert!(!task.transition(TaskStatus::Completed));
        assert!(task.transition(TaskStatus::Stopped));
    }

    #[test]
    fn test_disabled_proxy_has_no_url() {
        let proxy = ProxyConfig {
            enabled: false,
            url: Some("socks5://127.0.0.1:1080".into()),
        };
        assert_eq!(proxy.active_url(), None);
        let proxy = ProxyConfig::from_url("socks5://127.0.0.1:1080");
        assert_eq!(proxy.active_url(), Some("socks5://127.0.0.1:1080"));
    }
}
