//! Crawl task execution: the per-novel pipeline, the task table and the
//! per-novel locks that keep concurrent tasks off the same artifact.

mod locks;
mod orchestrator;
mod registry;

pub use locks::NovelLocks;
pub use orchestrator::{CrawlOrchestrator, NovelOutcome};
pub use registry::{CrawlSuccess, RegistrySummary, TaskControl, TaskRegistry};
