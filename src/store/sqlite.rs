use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};
use tracing::{debug, info, warn};

use crate::app::{NovelSyncError, Result};
use crate::artifact;
use crate::config::DatabaseConfig;
use crate::domain::{
    CrawlHistoryRecord, HistoryUpdate, NewHistoryRecord, RepairReport, TrackedChapter,
    TrackedChapters,
};
use crate::hasher;
use crate::store::{count_consecutive_failures, HistoryStore, TrackingStore, FAILURE_WINDOW};

const HISTORY_COLUMNS: &str = "id, site_id, novel_id, novel_title, status, file_path, \
     error_message, book_type, chapter_count, last_chapter_index, last_chapter_title, \
     content_hash, serial_mode, first_crawl_time, last_update_time, crawl_time";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    config: DatabaseConfig,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P, config: &DatabaseConfig) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::setup(conn, config.clone())
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::setup(conn, DatabaseConfig::default())
    }

    fn setup(mut conn: Connection, config: DatabaseConfig) -> Result<Self> {
        conn.busy_timeout(config.busy_timeout())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "Opened crawl database");
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);
        migrations.to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            NovelSyncError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    /// Runs `op` against the connection, retrying with exponential backoff
    /// while SQLite reports the database as busy or locked.
    fn with_conn<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(&mut Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let mut attempt = 0;
        loop {
            match op(&mut *conn) {
                Err(NovelSyncError::Database(e))
                    if is_contention(&e) && attempt < self.config.retry_attempts =>
                {
                    let delay = self.config.retry_delay(attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %e, "Database busy, retrying");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn history_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlHistoryRecord> {
        let time = |idx: usize| -> rusqlite::Result<DateTime<Utc>> {
            Ok(row
                .get::<_, String>(idx)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now))
        };

        Ok(CrawlHistoryRecord {
            id: row.get(0)?,
            site_id: row.get(1)?,
            novel_id: row.get(2)?,
            novel_title: row.get(3)?,
            status: row
                .get::<_, String>(4)?
                .parse()
                .map_err(|e: String| conversion_error(4, e))?,
            file_path: row.get(5)?,
            error_message: row.get(6)?,
            book_type: row
                .get::<_, String>(7)?
                .parse()
                .map_err(|e: String| conversion_error(7, e))?,
            chapter_count: row.get::<_, i64>(8)?.max(0) as usize,
            last_chapter_index: row.get::<_, Option<i64>>(9)?.map(|i| i.max(0) as usize),
            last_chapter_title: row.get(10)?,
            content_hash: row.get(11)?,
            serial_mode: row.get(12)?,
            first_crawl_time: time(13)?,
            last_update_time: time(14)?,
            crawl_time: time(15)?,
        })
    }

    fn query_tracked(conn: &Connection, site_id: &str, novel_id: &str) -> Result<TrackedChapters> {
        let mut stmt = conn.prepare(
            "SELECT chapter_index, chapter_title, content_hash, crawled_at
             FROM chapter_tracking
             WHERE site_id = ?1 AND novel_id = ?2
             ORDER BY chapter_index",
        )?;

        let rows = stmt.query_map(params![site_id, novel_id], |row| {
            Ok(TrackedChapter {
                index: row.get::<_, i64>(0)?.max(0) as usize,
                title: row.get(1)?,
                content_hash: row.get(2)?,
                crawled_at: row
                    .get::<_, String>(3)
                    .ok()
                    .and_then(|s| Self::parse_datetime(&s))
                    .unwrap_or_else(Utc::now),
            })
        })?;

        let mut tracked = TrackedChapters::new();
        for row in rows {
            let chapter = row?;
            tracked.insert(chapter.index, chapter);
        }
        Ok(tracked)
    }

    fn query_history(
        conn: &Connection,
        filter: &str,
        args: &[&dyn rusqlite::ToSql],
        limit: Option<usize>,
    ) -> Result<Vec<CrawlHistoryRecord>> {
        let mut sql = format!(
            "SELECT {} FROM crawl_history WHERE {} ORDER BY crawl_time DESC, id DESC",
            HISTORY_COLUMNS, filter
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(args, Self::history_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn query_last_successful(
        conn: &Connection,
        site_id: &str,
        novel_id: &str,
    ) -> Result<Option<CrawlHistoryRecord>> {
        let mut records = Self::query_history(
            conn,
            "site_id = ?1 AND novel_id = ?2 AND status = 'success'",
            &[&site_id, &novel_id],
            Some(1),
        )?;
        Ok(records.pop())
    }

    fn upsert_rows(
        conn: &mut Connection,
        site_id: &str,
        novel_id: &str,
        chapters: &[TrackedChapter],
        replace: bool,
    ) -> Result<usize> {
        let tx = conn.transaction()?;
        let mut count = 0;

        if replace {
            tx.execute(
                "DELETE FROM chapter_tracking WHERE site_id = ?1 AND novel_id = ?2",
                params![site_id, novel_id],
            )?;
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chapter_tracking
                    (site_id, novel_id, chapter_index, chapter_title, content_hash, crawled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (site_id, novel_id, chapter_index) DO UPDATE SET
                    chapter_title = excluded.chapter_title,
                    content_hash = excluded.content_hash,
                    crawled_at = excluded.crawled_at",
            )?;
            for chapter in chapters {
                count += stmt.execute(params![
                    site_id,
                    novel_id,
                    chapter.index as i64,
                    chapter.title,
                    chapter.content_hash,
                    Self::format_datetime(&chapter.crawled_at),
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }
}

fn is_contention(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

impl TrackingStore for SqliteStore {
    fn tracked_chapters(&self, site_id: &str, novel_id: &str) -> Result<TrackedChapters> {
        self.with_conn(|conn| Self::query_tracked(conn, site_id, novel_id))
    }

    fn batch_upsert_chapters(
        &self,
        site_id: &str,
        novel_id: &str,
        chapters: &[TrackedChapter],
    ) -> Result<usize> {
        if chapters.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| Self::upsert_rows(conn, site_id, novel_id, chapters, false))
    }

    fn replace_chapters(
        &self,
        site_id: &str,
        novel_id: &str,
        chapters: &[TrackedChapter],
    ) -> Result<usize> {
        self.with_conn(|conn| Self::upsert_rows(conn, site_id, novel_id, chapters, true))
    }

    fn repair_from_artifact(&self, site_id: &str, novel_id: &str) -> Result<RepairReport> {
        self.with_conn(|conn| {
            if !Self::query_tracked(conn, site_id, novel_id)?.is_empty() {
                return Ok(RepairReport::skipped("chapter tracking already present"));
            }

            let Some(record) = Self::query_last_successful(conn, site_id, novel_id)? else {
                return Ok(RepairReport::skipped("no successful crawl on record"));
            };
            if !record.serial_mode || record.chapter_count == 0 {
                return Ok(RepairReport::skipped("novel is not serial"));
            }

            let Some(path) = record.file_path.as_deref().map(Path::new) else {
                return Ok(RepairReport::skipped("history record has no artifact path"));
            };
            let text = match std::fs::read_to_string(path) {
                Ok(text) => text,
                Err(e) => {
                    return Ok(RepairReport::skipped(format!(
                        "artifact {} unreadable: {}",
                        path.display(),
                        e
                    )))
                }
            };

            let headings = artifact::scan_headings(&text);
            if headings.is_empty() {
                return Ok(RepairReport::skipped("no chapter headings found in artifact"));
            }

            // Bodies can't be separated reliably after the fact, so rows carry
            // title hashes only.
            let now = Utc::now();
            let rows: Vec<TrackedChapter> = headings
                .into_iter()
                .enumerate()
                .map(|(index, title)| TrackedChapter {
                    index,
                    content_hash: hasher::hash_content(&title),
                    title,
                    crawled_at: now,
                })
                .collect();

            let count = Self::upsert_rows(conn, site_id, novel_id, &rows, false)?;
            info!(site_id, novel_id, count, "Rebuilt chapter tracking from artifact");
            Ok(RepairReport::repaired(count))
        })
    }

    fn delete_all_chapters(&self, site_id: &str, novel_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM chapter_tracking WHERE site_id = ?1 AND novel_id = ?2",
                params![site_id, novel_id],
            )?)
        })
    }
}

impl HistoryStore for SqliteStore {
    fn add_record(&self, record: &NewHistoryRecord) -> Result<i64> {
        self.with_conn(|conn| {
            let now = Self::format_datetime(&Utc::now());
            let first_crawl: Option<String> = conn.query_row(
                "SELECT MIN(first_crawl_time) FROM crawl_history
                 WHERE site_id = ?1 AND novel_id = ?2",
                params![record.site_id, record.novel_id],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO crawl_history (
                    site_id, novel_id, novel_title, status, file_path, error_message,
                    book_type, chapter_count, last_chapter_index, last_chapter_title,
                    content_hash, serial_mode, first_crawl_time, last_update_time, crawl_time
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
                params![
                    record.site_id,
                    record.novel_id,
                    record.novel_title,
                    record.status.as_str(),
                    record.file_path,
                    record.error_message,
                    record.book_type.as_str(),
                    record.chapter_count as i64,
                    record.last_chapter_index.map(|i| i as i64),
                    record.last_chapter_title,
                    record.content_hash,
                    record.serial_mode,
                    first_crawl.unwrap_or_else(|| now.clone()),
                    now,
                ],
            )?;

            Ok(conn.last_insert_rowid())
        })
    }

    fn update_record(&self, id: i64, update: &HistoryUpdate) -> Result<bool> {
        if update.is_empty() {
            return Ok(self.get_record(id)?.is_some());
        }
        let touched = Self::format_datetime(&update.last_update_time.unwrap_or_else(Utc::now));
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE crawl_history SET
                    novel_title = COALESCE(?1, novel_title),
                    file_path = COALESCE(?2, file_path),
                    chapter_count = COALESCE(?3, chapter_count),
                    last_chapter_index = COALESCE(?4, last_chapter_index),
                    last_chapter_title = COALESCE(?5, last_chapter_title),
                    content_hash = COALESCE(?6, content_hash),
                    serial_mode = COALESCE(?7, serial_mode),
                    book_type = CASE
                        WHEN ?3 IS NULL THEN book_type
                        WHEN ?3 > 1 THEN 'serial'
                        ELSE 'short'
                    END,
                    last_update_time = ?8
                 WHERE id = ?9",
                params![
                    update.novel_title,
                    update.file_path,
                    update.chapter_count.map(|c| c as i64),
                    update.last_chapter_index.map(|i| i as i64),
                    update.last_chapter_title,
                    update.content_hash,
                    update.serial_mode,
                    touched,
                    id,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn get_record(&self, id: i64) -> Result<Option<CrawlHistoryRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM crawl_history WHERE id = ?1", HISTORY_COLUMNS);
            Ok(conn
                .query_row(&sql, params![id], Self::history_from_row)
                .optional()?)
        })
    }

    fn last_successful(
        &self,
        site_id: &str,
        novel_id: &str,
    ) -> Result<Option<CrawlHistoryRecord>> {
        self.with_conn(|conn| Self::query_last_successful(conn, site_id, novel_id))
    }

    fn consecutive_failures(&self, site_id: &str, novel_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let recent = Self::query_history(
                conn,
                "site_id = ?1 AND novel_id = ?2",
                &[&site_id, &novel_id],
                Some(FAILURE_WINDOW),
            )?;
            Ok(count_consecutive_failures(&recent))
        })
    }

    fn history_for_novel(
        &self,
        site_id: &str,
        novel_id: &str,
    ) -> Result<Vec<CrawlHistoryRecord>> {
        self.with_conn(|conn| {
            Self::query_history(
                conn,
                "site_id = ?1 AND novel_id = ?2",
                &[&site_id, &novel_id],
                None,
            )
        })
    }

    fn recent_history(&self, site_id: &str, limit: usize) -> Result<Vec<CrawlHistoryRecord>> {
        self.with_conn(|conn| {
            Self::query_history(conn, "site_id = ?1", &[&site_id], Some(limit))
        })
    }

    fn purge_novel(&self, site_id: &str, novel_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chapter_tracking WHERE site_id = ?1 AND novel_id = ?2",
                params![site_id, novel_id],
            )?;
            let removed = tx.execute(
                "DELETE FROM crawl_history WHERE site_id = ?1 AND novel_id = ?2",
                params![site_id, novel_id],
            )?;
            tx.commit()?;
            Ok(removed)
        })
    }

    fn delete_record(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM crawl_history WHERE id = ?1", params![id])? > 0)
        })
    }
}
