use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SKIP_MARKER_PREFIX: &str = "skipped after ";
const SKIP_MARKER_SUFFIX: &str = " consecutive failures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Success,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(HistoryStatus::Success),
            "failed" => Ok(HistoryStatus::Failed),
            other => Err(format!("unknown history status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookType {
    #[default]
    Short,
    Serial,
}

impl BookType {
    pub fn for_chapter_count(count: usize) -> Self {
        if count > 1 {
            BookType::Serial
        } else {
            BookType::Short
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookType::Short => "short",
            BookType::Serial => "serial",
        }
    }
}

impl FromStr for BookType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(BookType::Short),
            "serial" => Ok(BookType::Serial),
            other => Err(format!("unknown book type: {}", other)),
        }
    }
}

/// A persisted crawl attempt for one (site, novel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlHistoryRecord {
    pub id: i64,
    pub site_id: String,
    pub novel_id: String,
    pub novel_title: String,
    pub status: HistoryStatus,
    pub file_path: Option<String>,
    pub error_message: Option<String>,
    pub book_type: BookType,
    pub chapter_count: usize,
    pub last_chapter_index: Option<usize>,
    pub last_chapter_title: Option<String>,
    pub content_hash: Option<String>,
    pub serial_mode: bool,
    pub first_crawl_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub crawl_time: DateTime<Utc>,
}

impl CrawlHistoryRecord {
    pub fn is_success(&self) -> bool {
        self.status == HistoryStatus::Success
    }

    /// Whether this is a `failed` entry written when a novel was skipped
    /// instead of crawled.
    pub fn is_skip_marker(&self) -> bool {
        self.status == HistoryStatus::Failed
            && self
                .error_message
                .as_deref()
                .is_some_and(|m| parse_skip_marker(m).is_some())
    }
}

/// Fields for appending a new history row.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub site_id: String,
    pub novel_id: String,
    pub novel_title: String,
    pub status: HistoryStatus,
    pub file_path: Option<String>,
    pub error_message: Option<String>,
    pub book_type: BookType,
    pub chapter_count: usize,
    pub last_chapter_index: Option<usize>,
    pub last_chapter_title: Option<String>,
    pub content_hash: Option<String>,
    pub serial_mode: bool,
}

impl NewHistoryRecord {
    pub fn success(site_id: &str, novel_id: &str, novel_title: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            novel_id: novel_id.to_string(),
            novel_title: novel_title.to_string(),
            status: HistoryStatus::Success,
            file_path: None,
            error_message: None,
            book_type: BookType::Short,
            chapter_count: 0,
            last_chapter_index: None,
            last_chapter_title: None,
            content_hash: None,
            serial_mode: false,
        }
    }

    /// Failed attempts are titled with the novel id, the real title is unknown.
    pub fn failed(site_id: &str, novel_id: &str, error: impl Into<String>) -> Self {
        Self {
            status: HistoryStatus::Failed,
            error_message: Some(error.into()),
            ..Self::success(site_id, novel_id, novel_id)
        }
    }

    pub fn skipped(site_id: &str, novel_id: &str, failures: usize) -> Self {
        Self::failed(site_id, novel_id, skip_marker(failures))
    }
}

/// Partial update of an existing history row. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct HistoryUpdate {
    pub novel_title: Option<String>,
    pub file_path: Option<String>,
    pub chapter_count: Option<usize>,
    pub last_chapter_index: Option<usize>,
    pub last_chapter_title: Option<String>,
    pub content_hash: Option<String>,
    pub serial_mode: Option<bool>,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl HistoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.novel_title.is_none()
            && self.file_path.is_none()
            && self.chapter_count.is_none()
            && self.last_chapter_index.is_none()
            && self.last_chapter_title.is_none()
            && self.content_hash.is_none()
            && self.serial_mode.is_none()
            && self.last_update_time.is_none()
    }
}

pub fn skip_marker(failures: usize) -> String {
    format!("{}{}{}", SKIP_MARKER_PREFIX, failures, SKIP_MARKER_SUFFIX)
}

/// Returns the failure count carried by a skip marker message.
pub fn parse_skip_marker(message: &str) -> Option<usize> {
    message
        .strip_prefix(SKIP_MARKER_PREFIX)?
        .strip_suffix(SKIP_MARKER_SUFFIX)?
        .parse()
        .ok()
}
