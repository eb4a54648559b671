use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::app::{NovelSyncError, Result};
use crate::artifact::{ArtifactMerger, MergeInput, MergeOutcome};
use crate::config::{CrawlerConfig, SiteConfig};
use crate::crawler::{CrawlSuccess, NovelLocks, TaskControl};
use crate::dedup;
use crate::domain::{
    BookType, CrawlHistoryRecord, HistoryUpdate, NewHistoryRecord, ProxyConfig, TrackedChapter,
    TrackedChapters,
};
use crate::hasher;
use crate::parser::{ParserFactory, SiteParser};
use crate::store::CrawlStore;

/// What happened to one novel id of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NovelOutcome {
    /// Not attempted: the novel's recent history is a failure streak.
    Skipped { failures: usize },
    Crawled { title: String, merge: MergeOutcome },
}

/// Drives crawl tasks end to end against the shared store.
pub struct CrawlOrchestrator {
    store: Arc<dyn CrawlStore>,
    sites: Vec<SiteConfig>,
    config: CrawlerConfig,
    parsers: Arc<dyn ParserFactory>,
    locks: NovelLocks,
    merger: ArtifactMerger,
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<dyn CrawlStore>,
        sites: Vec<SiteConfig>,
        config: CrawlerConfig,
        parsers: Arc<dyn ParserFactory>,
    ) -> Self {
        Self {
            store,
            sites,
            config,
            parsers,
            locks: NovelLocks::new(),
            merger: ArtifactMerger::new(),
        }
    }

    pub fn site(&self, site_id: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.id == site_id)
    }

    /// Runs one task to a terminal state. Per-novel failures are recorded in
    /// history and never fail the task; only an unresolvable site or parser
    /// does.
    pub async fn run(&self, control: TaskControl) {
        if !control.begin() {
            info!(task_id = control.task_id(), "Task stopped before it started");
            return;
        }
        let Some(task) = control.snapshot() else {
            return;
        };

        let (site, parser) = match self.resolve_parser(&task.site_id, &task.proxy) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(task_id = %task.id, "Cannot start crawl task: {}", e);
                control.fail(e.to_string());
                return;
            }
        };
        let storage = site.storage_path();
        info!(
            task_id = %task.id,
            site_id = %task.site_id,
            parser = parser.name(),
            "Crawling {} novels",
            task.total
        );

        for (i, novel_id) in task.novel_ids.iter().enumerate() {
            if control.stop_requested() {
                info!(task_id = %task.id, processed = i, "Stopping task");
                break;
            }
            control.update(|t| t.current_novel_id = Some(novel_id.clone()));

            let mut new_chapters = 0;
            match self
                .crawl_novel(&task.site_id, novel_id, parser.as_ref(), &storage)
                .await
            {
                Ok(NovelOutcome::Skipped { .. }) => {
                    control.update(|t| t.failed_count += 1);
                }
                Ok(NovelOutcome::Crawled { title, merge }) => {
                    new_chapters = merge.new_chapter_count;
                    control.update(|t| t.success_count += 1);
                    control.notify_success(CrawlSuccess {
                        task_id: task.id.clone(),
                        site_id: task.site_id.clone(),
                        novel_id: novel_id.clone(),
                        title,
                        already_exists: merge.already_exists,
                        new_chapters,
                    });
                }
                Err(e) => {
                    warn!(site_id = %task.site_id, novel_id = %novel_id, "Crawl failed: {}", e);
                    let record = NewHistoryRecord::failed(&task.site_id, novel_id, e.to_string());
                    if let Err(store_err) = self.add_record(record).await {
                        error!(novel_id = %novel_id, "Failed to record crawl failure: {}", store_err);
                    }
                    control.update(|t| t.failed_count += 1);
                }
            }
            control.update(|t| t.progress = i + 1);

            if new_chapters > 0 && i + 1 < task.novel_ids.len() {
                let delay = self.config.politeness_delay(new_chapters);
                debug!(?delay, "Politeness delay");
                tokio::time::sleep(delay).await;
            }
        }

        let status = control.finish();
        if let Some(done) = control.snapshot() {
            info!(
                task_id = %done.id,
                status = status.as_str(),
                succeeded = done.success_count,
                failed = done.failed_count,
                "Crawl task finished"
            );
        }
    }

    fn resolve_parser(
        &self,
        site_id: &str,
        proxy: &ProxyConfig,
    ) -> Result<(SiteConfig, Box<dyn SiteParser>)> {
        let site = self
            .site(site_id)
            .ok_or_else(|| NovelSyncError::SiteNotFound(site_id.to_string()))?
            .clone();
        let parser = self.parsers.create(&site, proxy)?;
        Ok((site, parser))
    }

    /// Fetches, deduplicates, merges and records one novel.
    pub async fn crawl_novel(
        &self,
        site_id: &str,
        novel_id: &str,
        parser: &dyn SiteParser,
        storage_folder: &Path,
    ) -> Result<NovelOutcome> {
        let key = Key::new(site_id, novel_id);

        let failures = self
            .query(&key, |s, k| s.consecutive_failures(&k.site, &k.novel))
            .await?;
        if failures >= self.config.failure_threshold {
            info!(site_id, novel_id, failures, "Skipping novel after repeated failures");
            self.add_record(NewHistoryRecord::skipped(site_id, novel_id, failures))
                .await?;
            return Ok(NovelOutcome::Skipped { failures });
        }

        let _guard = self.locks.acquire(site_id, novel_id).await;

        parser.reset_per_book_state();
        let novel = parser.parse_novel_detail(novel_id).await?;
        if novel.chapters.is_empty() {
            return Err(NovelSyncError::Parser(format!(
                "no chapters returned for novel {}",
                novel_id
            )));
        }

        let mut tracked = self
            .query(&key, |s, k| s.tracked_chapters(&k.site, &k.novel))
            .await?;
        let mut previous = self
            .query(&key, |s, k| s.last_successful(&k.site, &k.novel))
            .await?;

        if tracked.is_empty() {
            if let Some(legacy) = previous.clone().filter(is_legacy) {
                info!(site_id, novel_id, "Artifact has no chapter tracking, attempting repair");
                let report = self
                    .query(&key, |s, k| s.repair_from_artifact(&k.site, &k.novel))
                    .await?;
                if report.success {
                    tracked = self
                        .query(&key, |s, k| s.tracked_chapters(&k.site, &k.novel))
                        .await?;
                    self.backfill_repaired(&legacy, &tracked).await?;
                    previous = self
                        .query(&key, |s, k| s.last_successful(&k.site, &k.novel))
                        .await?;
                } else {
                    info!(site_id, novel_id, reason = %report.reason, "Tracking repair skipped");
                }
            }
        }

        let partition = dedup::partition(&novel.chapters, &tracked);
        debug!(
            site_id,
            novel_id,
            new = partition.new_chapters.len(),
            duplicates = partition.duplicate_count,
            "Partitioned fetched chapters"
        );

        let merge = self
            .merger
            .merge(
                parser,
                MergeInput {
                    novel: &novel,
                    new_chapters: &partition.new_chapters,
                    previous: previous.as_ref(),
                    tracked_count: tracked.len(),
                    storage_folder,
                },
            )
            .await?;

        if merge.is_noop() {
            info!(site_id, novel_id, "No new chapters");
            let record = match previous.as_ref() {
                Some(prev) => unchanged_record(prev, &novel.title),
                None => NewHistoryRecord::success(site_id, novel_id, &novel.title),
            };
            self.add_record(record).await?;
            return Ok(NovelOutcome::Crawled {
                title: novel.title,
                merge,
            });
        }

        let now = Utc::now();
        let last_chapter = if merge.strategy.tracks_all_chapters() {
            let rows: Vec<TrackedChapter> = novel
                .chapters
                .iter()
                .enumerate()
                .map(|(index, chapter)| TrackedChapter::from_chapter(index, chapter, now))
                .collect();
            self.query(&key, move |s, k| s.replace_chapters(&k.site, &k.novel, &rows))
                .await?;
            novel.chapters.last()
        } else {
            let start = tracked.keys().next_back().map_or(0, |last| last + 1);
            let rows: Vec<TrackedChapter> = partition
                .new_chapters
                .iter()
                .enumerate()
                .map(|(offset, chapter)| TrackedChapter::from_chapter(start + offset, chapter, now))
                .collect();
            self.query(&key, move |s, k| s.batch_upsert_chapters(&k.site, &k.novel, &rows))
                .await?;
            partition.new_chapters.last()
        };

        let content_hash = match merge.file_path.clone() {
            Some(path) => self.hash_artifact(path).await,
            None => None,
        };
        let total = merge.total_chapters;
        let record = NewHistoryRecord {
            file_path: merge
                .file_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            book_type: BookType::for_chapter_count(total),
            chapter_count: total,
            last_chapter_index: total.checked_sub(1),
            last_chapter_title: last_chapter.map(|c| c.title.clone()),
            content_hash,
            serial_mode: total > 1,
            ..NewHistoryRecord::success(site_id, novel_id, &novel.title)
        };
        self.add_record(record).await?;

        info!(
            site_id,
            novel_id,
            strategy = ?merge.strategy,
            total,
            new = merge.new_chapter_count,
            "Novel crawled"
        );
        Ok(NovelOutcome::Crawled {
            title: novel.title,
            merge,
        })
    }

    /// Fills in what a pre-tracking record lacks once its rows are rebuilt.
    async fn backfill_repaired(
        &self,
        legacy: &CrawlHistoryRecord,
        tracked: &TrackedChapters,
    ) -> Result<()> {
        let content_hash = match legacy.file_path.as_deref() {
            Some(path) => self.hash_artifact(PathBuf::from(path)).await,
            None => None,
        };
        let last = tracked.values().next_back();
        let update = HistoryUpdate {
            chapter_count: Some(tracked.len()),
            last_chapter_index: last.map(|c| c.index),
            last_chapter_title: last.map(|c| c.title.clone()),
            content_hash,
            ..Default::default()
        };
        let id = legacy.id;
        self.store_call(move |s| s.update_record(id, &update)).await?;
        Ok(())
    }

    async fn hash_artifact(&self, path: PathBuf) -> Option<String> {
        let shown = path.display().to_string();
        match tokio::task::spawn_blocking(move || hasher::hash_file(&path)).await {
            Ok(Ok(hash)) => Some(hash),
            Ok(Err(e)) => {
                warn!("Hash unavailable for {}: {}", shown, e);
                None
            }
            Err(e) => {
                warn!("Hash task for {} failed: {}", shown, e);
                None
            }
        }
    }

    async fn add_record(&self, record: NewHistoryRecord) -> Result<i64> {
        self.store_call(move |s| s.add_record(&record)).await
    }

    async fn query<T, F>(&self, key: &Key, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CrawlStore, &Key) -> Result<T> + Send + 'static,
    {
        let key = key.clone();
        self.store_call(move |s| f(s, &key)).await
    }

    /// Store calls block on SQLite, so they run on the blocking pool.
    async fn store_call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CrawlStore) -> Result<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| NovelSyncError::Other(format!("store call failed: {}", e)))?
    }
}

#[derive(Debug, Clone)]
struct Key {
    site: String,
    novel: String,
}

impl Key {
    fn new(site_id: &str, novel_id: &str) -> Self {
        Self {
            site: site_id.to_string(),
            novel: novel_id.to_string(),
        }
    }
}

/// A serial novel with a file on disk: tracking rows should exist for it.
fn is_legacy(record: &CrawlHistoryRecord) -> bool {
    record.serial_mode
        && record.chapter_count > 0
        && record
            .file_path
            .as_deref()
            .is_some_and(|p| Path::new(p).is_file())
}

fn unchanged_record(previous: &CrawlHistoryRecord, title: &str) -> NewHistoryRecord {
    NewHistoryRecord {
        file_path: previous.file_path.clone(),
        book_type: previous.book_type,
        chapter_count: previous.chapter_count,
        last_chapter_index: previous.last_chapter_index,
        last_chapter_title: previous.last_chapter_title.clone(),
        content_hash: previous.content_hash.clone(),
        serial_mode: previous.serial_mode,
        ..NewHistoryRecord::success(&previous.site_id, &previous.novel_id, title)
    }
}
