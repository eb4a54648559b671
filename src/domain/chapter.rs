use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hasher;

/// A chapter as returned by a site parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    pub fn content_hash(&self) -> String {
        hasher::hash_content(&self.content)
    }
}

/// One persisted chapter-tracking row for a (site, novel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedChapter {
    pub index: usize,
    pub title: String,
    pub content_hash: String,
    pub crawled_at: DateTime<Utc>,
}

impl TrackedChapter {
    pub fn from_chapter(index: usize, chapter: &Chapter, crawled_at: DateTime<Utc>) -> Self {
        Self {
            index,
            title: chapter.title.clone(),
            content_hash: chapter.content_hash(),
            crawled_at,
        }
    }
}

/// Tracked chapters keyed by their zero-based index in the merged artifact.
pub type TrackedChapters = BTreeMap<usize, TrackedChapter>;

/// Outcome of `repair_from_artifact`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub success: bool,
    pub count: usize,
    pub reason: String,
}

impl RepairReport {
    pub fn repaired(count: usize) -> Self {
        Self {
            success: true,
            count,
            reason: format!("recovered {} chapter headings", count),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            count: 0,
            reason: reason.into(),
        }
    }
}
