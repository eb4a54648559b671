pub mod chapter;
pub mod history;
pub mod task;

pub use chapter::{Chapter, RepairReport, TrackedChapter, TrackedChapters};
pub use history::{
    BookType, CrawlHistoryRecord, HistoryStatus, HistoryUpdate, NewHistoryRecord,
};
pub use task::{CrawlTask, ProxyConfig, TaskStatus};
