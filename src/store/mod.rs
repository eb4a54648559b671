pub mod sqlite;

use crate::app::Result;
use crate::domain::{
    CrawlHistoryRecord, HistoryUpdate, NewHistoryRecord, RepairReport, TrackedChapter,
    TrackedChapters,
};

pub use sqlite::SqliteStore;

/// Newest records considered by `consecutive_failures`.
pub const FAILURE_WINDOW: usize = 10;

pub trait TrackingStore: Send + Sync {
    /// Empty when nothing is tracked (first crawl or legacy artifact).
    fn tracked_chapters(&self, site_id: &str, novel_id: &str) -> Result<TrackedChapters>;
    /// All rows land in one transaction; an existing index is overwritten.
    fn batch_upsert_chapters(
        &self,
        site_id: &str,
        novel_id: &str,
        chapters: &[TrackedChapter],
    ) -> Result<usize>;
    /// Drops every row for the novel and writes `chapters` in one transaction.
    fn replace_chapters(
        &self,
        site_id: &str,
        novel_id: &str,
        chapters: &[TrackedChapter],
    ) -> Result<usize>;
    fn repair_from_artifact(&self, site_id: &str, novel_id: &str) -> Result<RepairReport>;
    fn delete_all_chapters(&self, site_id: &str, novel_id: &str) -> Result<usize>;
}

pub trait HistoryStore: Send + Sync {
    fn add_record(&self, record: &NewHistoryRecord) -> Result<i64>;
    fn update_record(&self, id: i64, update: &HistoryUpdate) -> Result<bool>;
    fn get_record(&self, id: i64) -> Result<Option<CrawlHistoryRecord>>;
    fn last_successful(&self, site_id: &str, novel_id: &str)
        -> Result<Option<CrawlHistoryRecord>>;
    fn consecutive_failures(&self, site_id: &str, novel_id: &str) -> Result<usize>;
    /// Newest first.
    fn history_for_novel(&self, site_id: &str, novel_id: &str)
        -> Result<Vec<CrawlHistoryRecord>>;
    fn recent_history(&self, site_id: &str, limit: usize) -> Result<Vec<CrawlHistoryRecord>>;
    /// Removes history and tracking for the novel. Returns deleted history rows.
    fn purge_novel(&self, site_id: &str, novel_id: &str) -> Result<usize>;
    fn delete_record(&self, id: i64) -> Result<bool>;
}

/// Both stores behind one shared handle.
pub trait CrawlStore: TrackingStore + HistoryStore {}

impl<T: TrackingStore + HistoryStore> CrawlStore for T {}

/// Failure streak over newest-first records.
///
/// A success ends the streak. A skip marker ends it too, contributing the
/// count it was written with, so the streak stays frozen once skipping starts.
pub fn count_consecutive_failures<'a, I>(records: I) -> usize
where
    I: IntoIterator<Item = &'a CrawlHistoryRecord>,
{
    let mut count = 0;
    for record in records.into_iter().take(FAILURE_WINDOW) {
        if record.is_success() {
            break;
        }
        if let Some(frozen) = record
            .error_message
            .as_deref()
            .and_then(crate::domain::history::parse_skip_marker)
        {
            count += frozen;
            break;
        }
        count += 1;
    }
    count
}
