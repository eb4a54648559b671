use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use novelsync::app::{NovelSyncError, Result};
use novelsync::artifact::render_book;
use novelsync::config::{CrawlerConfig, SiteConfig};
use novelsync::crawler::{CrawlOrchestrator, CrawlSuccess, TaskRegistry};
use novelsync::domain::{
    BookType, Chapter, CrawlTask, NewHistoryRecord, ProxyConfig, TaskStatus,
};
use novelsync::parser::{ParsedNovel, ParserFactory, SiteParser};
use novelsync::store::{HistoryStore, SqliteStore, TrackingStore};

/// Parser responses keyed by novel id, shared between the test and the
/// parser instances the factory hands out.
#[derive(Default)]
struct Script {
    novels: Mutex<HashMap<String, std::result::Result<ParsedNovel, String>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: Mutex<Vec<String>>,
    resets: AtomicUsize,
    proxies: Mutex<Vec<ProxyConfig>>,
}

impl Script {
    fn serve(&self, novel_id: &str, title: &str, chapters: usize) {
        self.serve_chapters(novel_id, title, chapters_upto(chapters));
    }

    fn serve_chapters(&self, novel_id: &str, title: &str, chapters: Vec<Chapter>) {
        let novel = ParsedNovel {
            title: title.to_string(),
            author: Some("Author".into()),
            tags: Vec::new(),
            chapters,
        };
        self.novels
            .lock()
            .unwrap()
            .insert(novel_id.to_string(), Ok(novel));
    }

    fn fail(&self, novel_id: &str, error: &str) {
        self.novels
            .lock()
            .unwrap()
            .insert(novel_id.to_string(), Err(error.to_string()));
    }

    fn gate(&self, novel_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(novel_id.to_string(), gate.clone());
        gate
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct ScriptedParser {
    script: Arc<Script>,
}

#[async_trait]
impl SiteParser for ScriptedParser {
    fn name(&self) -> &str {
        "scripted"
    }

    fn reset_per_book_state(&self) {
        self.script.resets.fetch_add(1, Ordering::SeqCst);
    }

    async fn parse_novel_detail(&self, novel_id: &str) -> Result<ParsedNovel> {
        self.script.calls.lock().unwrap().push(novel_id.to_string());

        let gate = self.script.gates.lock().unwrap().get(novel_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let response = self.script.novels.lock().unwrap().get(novel_id).cloned();
        match response {
            Some(Ok(novel)) => Ok(novel),
            Some(Err(e)) => Err(NovelSyncError::Parser(e)),
            None => Err(NovelSyncError::Parser(format!("novel {} not found", novel_id))),
        }
    }
}

struct ScriptedFactory {
    script: Arc<Script>,
}

impl ParserFactory for ScriptedFactory {
    fn create(&self, site: &SiteConfig, proxy: &ProxyConfig) -> Result<Box<dyn SiteParser>> {
        if site.parser != "scripted" {
            return Err(NovelSyncError::UnknownParser(site.parser.clone()));
        }
        self.script.proxies.lock().unwrap().push(proxy.clone());
        Ok(Box::new(ScriptedParser {
            script: self.script.clone(),
        }))
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<SqliteStore>,
    registry: TaskRegistry,
    script: Arc<Script>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let site = |id: &str, parser: &str| SiteConfig {
            id: id.into(),
            name: "Demo".into(),
            url: "https://novels.invalid/{id}".into(),
            parser: parser.into(),
            storage_folder: dir.path().to_string_lossy().into_owned(),
            tags: Vec::new(),
        };
        let sites = vec![site("demo", "scripted"), site("broken", "nope")];

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let script = Arc::new(Script::default());
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            store.clone(),
            sites,
            CrawlerConfig::without_delays(),
            Arc::new(ScriptedFactory {
                script: script.clone(),
            }),
        ));
        let registry = TaskRegistry::new(orchestrator);

        Self {
            dir,
            store,
            registry,
            script,
        }
    }

    async fn crawl(&self, ids: &[&str]) -> CrawlTask {
        self.crawl_site("demo", ids).await
    }

    async fn crawl_site(&self, site: &str, ids: &[&str]) -> CrawlTask {
        let ids = ids.iter().map(|s| s.to_string()).collect();
        let task_id = self.registry.submit(site, ids, ProxyConfig::default());
        self.registry.join(&task_id).await.unwrap()
    }

    fn artifact_path(&self, novel_id: &str) -> PathBuf {
        let record = self
            .store
            .last_successful("demo", novel_id)
            .unwrap()
            .expect("novel has a successful crawl");
        PathBuf::from(record.file_path.expect("record has a file path"))
    }
}

fn chapters_upto(n: usize) -> Vec<Chapter> {
    (1..=n)
        .map(|i| Chapter::new(format!("Chapter {}", i), format!("Text of chapter {}.", i)))
        .collect()
}

fn heading_count(path: &Path) -> usize {
    let text = std::fs::read_to_string(path).unwrap();
    novelsync::artifact::scan_headings(&text).len()
}

async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_first_crawl_then_incremental_append() {
    let h = Harness::new();
    h.script.serve("A", "Alpha", 3);
    h.script.fail("B", "HTTP 503");
    h.script.serve("C", "Gamma", 2);

    let task = h.crawl(&["A", "B", "C"]).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.success_count, 2);
    assert_eq!(task.failed_count, 1);
    assert_eq!(task.progress, 3);

    let path = h.artifact_path("A");
    assert_eq!(heading_count(&path), 3);
    let first_rows = h.store.tracked_chapters("demo", "A").unwrap();
    assert_eq!(first_rows.len(), 3);
    let first = h.store.last_successful("demo", "A").unwrap().unwrap();
    assert!(first.serial_mode);
    assert_eq!(first.book_type, BookType::Serial);

    let failed = h.store.history_for_novel("demo", "B").unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error_message.as_deref().unwrap().contains("HTTP 503"));

    h.script.serve("A", "Alpha", 4);
    let task = h.crawl(&["A"]).await;
    assert_eq!(task.status, TaskStatus::Completed);

    assert_eq!(h.artifact_path("A"), path);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        render_book("Alpha", &chapters_upto(4))
    );

    let rows = h.store.tracked_chapters("demo", "A").unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[&3].title, "Chapter 4");
    for index in 0..3 {
        assert_eq!(rows[&index], first_rows[&index], "row {} was re-tracked", index);
    }

    let latest = h.store.last_successful("demo", "A").unwrap().unwrap();
    assert_eq!(latest.chapter_count, 4);
    assert_eq!(latest.last_chapter_index, Some(3));
    assert_eq!(latest.last_chapter_title.as_deref(), Some("Chapter 4"));
    assert_eq!(latest.first_crawl_time, first.first_crawl_time);
    assert!(latest.content_hash.is_some());
    assert_ne!(latest.content_hash, first.content_hash);
}

#[tokio::test]
async fn test_recrawls_never_duplicate_content() {
    let h = Harness::new();
    h.script.serve("A", "Alpha", 2);
    h.crawl(&["A"]).await;

    for total in [3, 5, 6] {
        h.script.serve("A", "Alpha", total);
        h.crawl(&["A"]).await;
        assert_eq!(heading_count(&h.artifact_path("A")), total);
    }
}

#[tokio::test]
async fn test_unchanged_novel_is_a_noop() {
    let h = Harness::new();
    let seen: Arc<Mutex<Vec<CrawlSuccess>>> = Arc::default();
    {
        let seen = seen.clone();
        h.registry
            .register_success_observer(move |s| seen.lock().unwrap().push(s.clone()));
    }

    h.script.serve("A", "Alpha", 3);
    h.crawl(&["A"]).await;
    let path = h.artifact_path("A");
    let before = std::fs::read(&path).unwrap();

    let task = h.crawl(&["A"]).await;
    assert_eq!(task.success_count, 1);
    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 1);

    eventually(|| seen.lock().unwrap().len() == 2).await;
    let seen = seen.lock().unwrap();
    assert!(!seen[0].already_exists);
    assert_eq!(seen[0].new_chapters, 3);
    assert!(seen[1].already_exists);
    assert_eq!(seen[1].new_chapters, 0);

    let history = h.store.history_for_novel("demo", "A").unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.is_success()));
    assert_eq!(history[0].chapter_count, 3);
}

#[tokio::test]
async fn test_legacy_artifact_is_repaired_not_duplicated() {
    let h = Harness::new();
    let path = h.dir.path().join("Alpha.txt");
    let original = render_book("Alpha", &chapters_upto(3));
    std::fs::write(&path, &original).unwrap();
    h.store
        .add_record(&NewHistoryRecord {
            file_path: Some(path.to_string_lossy().into_owned()),
            chapter_count: 3,
            book_type: BookType::Serial,
            serial_mode: true,
            ..NewHistoryRecord::success("demo", "A", "Alpha")
        })
        .unwrap();
    let legacy_id = h.store.last_successful("demo", "A").unwrap().unwrap().id;

    h.script.serve("A", "Alpha", 3);
    let task = h.crawl(&["A"]).await;
    assert_eq!(task.success_count, 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    assert_eq!(h.store.tracked_chapters("demo", "A").unwrap().len(), 3);

    let legacy = h.store.get_record(legacy_id).unwrap().unwrap();
    assert_eq!(legacy.last_chapter_title.as_deref(), Some("Chapter 3"));
    assert!(legacy.content_hash.is_some());

    let latest = &h.store.history_for_novel("demo", "A").unwrap()[0];
    assert_ne!(latest.id, legacy_id);
    assert_eq!(latest.chapter_count, 3);
    assert_eq!(latest.last_chapter_index, Some(2));
    assert_eq!(latest.last_chapter_title.as_deref(), Some("Chapter 3"));
    assert_eq!(latest.content_hash, legacy.content_hash);

    // Tracking is in place now, so the next chapter is a plain append.
    h.script.serve("A", "Alpha", 4);
    h.crawl(&["A"]).await;
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        render_book("Alpha", &chapters_upto(4))
    );
}

#[tokio::test]
async fn test_heading_lines_in_bodies_keep_counts_in_step() {
    let h = Harness::new();
    let noted = |n: usize| -> Vec<Chapter> {
        (1..=n)
            .map(|i| {
                Chapter::new(
                    format!("Chapter {}", i),
                    format!("## Part {} notes\nText of chapter {}.", i, i),
                )
            })
            .collect()
    };
    let assert_in_step = |expected: usize| {
        let rows = h.store.tracked_chapters("demo", "A").unwrap();
        let latest = h.store.last_successful("demo", "A").unwrap().unwrap();
        assert_eq!(rows.len(), expected);
        assert_eq!(latest.chapter_count, rows.len());
        assert_eq!(latest.last_chapter_index, Some(expected - 1));
    };

    h.script.serve_chapters("A", "Alpha", noted(3));
    h.crawl(&["A"]).await;
    assert_in_step(3);

    let mut chapters = noted(4);
    chapters.push(Chapter::new("", "An untitled interlude."));
    h.script.serve_chapters("A", "Alpha", chapters.clone());
    h.crawl(&["A"]).await;
    assert_in_step(5);
    let latest = h.store.last_successful("demo", "A").unwrap().unwrap();
    assert_eq!(latest.last_chapter_title.as_deref(), Some(""));

    h.script.serve_chapters("A", "Alpha", chapters.clone());
    h.crawl(&["A"]).await;
    assert_in_step(5);
    assert_eq!(
        std::fs::read_to_string(h.artifact_path("A")).unwrap(),
        render_book("Alpha", &chapters)
    );
}

#[tokio::test]
async fn test_unrepairable_artifact_is_rewritten() {
    let h = Harness::new();
    let path = h.dir.path().join("Alpha.txt");
    std::fs::write(&path, "Alpha\n\nChapter 1\nText\nChapter 2\nText\n").unwrap();
    h.store
        .add_record(&NewHistoryRecord {
            file_path: Some(path.to_string_lossy().into_owned()),
            chapter_count: 2,
            book_type: BookType::Serial,
            serial_mode: true,
            ..NewHistoryRecord::success("demo", "A", "Alpha")
        })
        .unwrap();

    h.script.serve("A", "Alpha", 3);
    let task = h.crawl(&["A"]).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.success_count, 1);

    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        render_book("Alpha", &chapters_upto(3))
    );
    assert_eq!(h.store.tracked_chapters("demo", "A").unwrap().len(), 3);
    let latest = h.store.last_successful("demo", "A").unwrap().unwrap();
    assert_eq!(latest.chapter_count, 3);
}

#[tokio::test]
async fn test_missing_artifact_falls_back_to_first_crawl() {
    let h = Harness::new();
    h.script.serve("A", "Alpha", 2);
    h.crawl(&["A"]).await;
    let path = h.artifact_path("A");
    std::fs::remove_file(&path).unwrap();

    h.script.serve("A", "Alpha", 3);
    h.crawl(&["A"]).await;
    let rewritten = h.artifact_path("A");
    assert!(rewritten.is_file());
    assert_eq!(heading_count(&rewritten), 3);
    assert_eq!(h.store.tracked_chapters("demo", "A").unwrap().len(), 3);
}

#[tokio::test]
async fn test_repeated_failures_skip_novel_until_success() {
    let h = Harness::new();
    h.script.fail("X", "parse error");

    for _ in 0..3 {
        let task = h.crawl(&["X"]).await;
        assert_eq!(task.failed_count, 1);
    }
    assert_eq!(h.script.calls().len(), 3);
    assert_eq!(h.store.consecutive_failures("demo", "X").unwrap(), 3);

    for _ in 0..2 {
        let task = h.crawl(&["X"]).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.failed_count, 1);
    }
    assert_eq!(h.script.calls().len(), 3, "skipped novels must not reach the parser");
    let newest = &h.store.history_for_novel("demo", "X").unwrap()[0];
    assert!(newest.is_skip_marker());
    assert_eq!(h.store.consecutive_failures("demo", "X").unwrap(), 3);

    h.store
        .add_record(&NewHistoryRecord::success("demo", "X", "Recovered"))
        .unwrap();
    assert_eq!(h.store.consecutive_failures("demo", "X").unwrap(), 0);

    h.script.serve("X", "Recovered", 2);
    let task = h.crawl(&["X"]).await;
    assert_eq!(task.success_count, 1);
    assert_eq!(h.script.calls().len(), 4);
}

#[tokio::test]
async fn test_stop_between_novels() {
    let h = Harness::new();
    for id in ["A", "B", "C"] {
        h.script.serve(id, id, 2);
    }
    let gate = h.script.gate("A");

    let task_id = h.registry.submit(
        "demo",
        vec!["A".into(), "B".into(), "C".into()],
        ProxyConfig::default(),
    );
    eventually(|| h.script.calls() == vec!["A".to_string()]).await;

    assert!(h.registry.stop(&task_id));
    gate.notify_one();
    let task = h.registry.join(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Stopped);
    assert_eq!(task.progress, 1);
    assert!(task.ended_at.is_some());
    assert_eq!(h.store.history_for_novel("demo", "A").unwrap().len(), 1);
    assert!(h.store.history_for_novel("demo", "B").unwrap().is_empty());
    assert!(h.store.history_for_novel("demo", "C").unwrap().is_empty());

    assert!(!h.registry.stop(&task_id));
}

#[tokio::test]
async fn test_unresolvable_site_fails_task() {
    let h = Harness::new();

    let task = h.crawl_site("missing", &["A"]).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("missing"));

    let task = h.crawl_site("broken", &["A"]).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("nope"));

    assert!(h.script.calls().is_empty());
    assert!(h.store.history_for_novel("missing", "A").unwrap().is_empty());
}

#[tokio::test]
async fn test_registry_bookkeeping_and_observers() {
    let h = Harness::new();
    let statuses: Arc<Mutex<Vec<TaskStatus>>> = Arc::default();
    {
        let statuses = statuses.clone();
        h.registry
            .register_status_observer(move |t| statuses.lock().unwrap().push(t.status));
    }

    h.script.serve("A", "Alpha", 1);
    h.script.serve("B", "Beta", 1);
    let gate = h.script.gate("A");

    let task_id = h.registry.submit(
        "demo",
        vec!["A".into(), "B".into()],
        ProxyConfig::from_url("socks5://127.0.0.1:1080"),
    );
    eventually(|| !h.script.calls().is_empty()).await;

    let active = h.registry.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, task_id);
    assert_eq!(active[0].status, TaskStatus::Running);
    assert_eq!(active[0].current_novel_id.as_deref(), Some("A"));
    assert_eq!(h.registry.summary().active, 1);

    gate.notify_one();
    let task = h.registry.join(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.success_count, 2);
    assert!(h.registry.list_active().is_empty());

    let summary = h.registry.summary();
    assert_eq!((summary.active, summary.finished, summary.total), (0, 1, 1));

    let proxies = h.script.proxies.lock().unwrap().clone();
    assert_eq!(proxies[0].active_url(), Some("socks5://127.0.0.1:1080"));
    assert_eq!(h.script.resets.load(Ordering::SeqCst), 2);

    eventually(|| statuses.lock().unwrap().last() == Some(&TaskStatus::Completed)).await;
    let statuses = statuses.lock().unwrap();
    assert_eq!(statuses.first(), Some(&TaskStatus::Pending));
    assert!(statuses.contains(&TaskStatus::Running));

    assert!(!h.registry.stop("no-such-task"));
    assert!(h.registry.get_task("no-such-task").is_none());
    assert!(matches!(
        h.registry.join("no-such-task").await,
        Err(NovelSyncError::TaskNotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_tasks_on_same_novel_do_not_corrupt_artifact() {
    let h = Harness::new();
    h.script.serve("A", "Alpha", 3);
    h.crawl(&["A"]).await;

    h.script.serve("A", "Alpha", 5);
    let first = h.registry.submit("demo", vec!["A".into()], ProxyConfig::default());
    let second = h.registry.submit("demo", vec!["A".into()], ProxyConfig::default());
    h.registry.join(&first).await.unwrap();
    h.registry.join(&second).await.unwrap();

    let path = h.artifact_path("A");
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        render_book("Alpha", &chapters_upto(5))
    );
    assert_eq!(h.store.tracked_chapters("demo", "A").unwrap().len(), 5);
}
