use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::app::Result;
use crate::artifact::{render_book, render_chapter, write_atomically};
use crate::domain::{Chapter, CrawlHistoryRecord};
use crate::parser::{ParsedNovel, SiteParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Nothing to write; no file was touched.
    Unchanged,
    /// No usable prior artifact: the full chapter set went to a new file.
    FirstCrawl,
    /// Only the new chapters were appended to the prior artifact.
    IncrementalAppend,
    /// The prior artifact had no tracking rows and was rewritten from the
    /// freshly fetched chapter list.
    LegacyRewrite,
}

impl MergeStrategy {
    /// Whether every chapter of the result must be (re)tracked, as opposed to
    /// only the appended ones.
    pub fn tracks_all_chapters(self) -> bool {
        matches!(self, MergeStrategy::FirstCrawl | MergeStrategy::LegacyRewrite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub strategy: MergeStrategy,
    pub file_path: Option<PathBuf>,
    pub total_chapters: usize,
    pub new_chapter_count: usize,
    /// A successful crawl of this novel was on record before this merge.
    pub already_exists: bool,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        self.strategy == MergeStrategy::Unchanged
    }
}

pub struct MergeInput<'a> {
    pub novel: &'a ParsedNovel,
    pub new_chapters: &'a [Chapter],
    pub previous: Option<&'a CrawlHistoryRecord>,
    /// Tracking rows on record before this merge.
    pub tracked_count: usize,
    pub storage_folder: &'a Path,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactMerger;

impl ArtifactMerger {
    pub fn new() -> Self {
        Self
    }

    /// Picks a strategy from the evidence at hand. The prior file must exist
    /// on disk before anything is appended to or rewritten in it.
    pub fn select_strategy(&self, input: &MergeInput<'_>) -> (MergeStrategy, Option<PathBuf>) {
        let existing = input
            .previous
            .and_then(|record| record.file_path.as_deref())
            .map(PathBuf::from)
            .filter(|path| path.is_file());

        match existing {
            None if input.novel.chapters.is_empty() => (MergeStrategy::Unchanged, None),
            None => (MergeStrategy::FirstCrawl, None),
            Some(path) if input.tracked_count == 0 => {
                if input.novel.chapters.is_empty() {
                    (MergeStrategy::Unchanged, Some(path))
                } else {
                    (MergeStrategy::LegacyRewrite, Some(path))
                }
            }
            Some(path) if input.new_chapters.is_empty() => (MergeStrategy::Unchanged, Some(path)),
            Some(path) => (MergeStrategy::IncrementalAppend, Some(path)),
        }
    }

    pub async fn merge(&self, parser: &dyn SiteParser, input: MergeInput<'_>) -> Result<MergeOutcome> {
        let already_exists = input.previous.is_some();
        let previous_count = input.previous.map_or(0, |r| r.chapter_count);
        let (strategy, existing) = self.select_strategy(&input);

        match (strategy, existing) {
            (MergeStrategy::FirstCrawl, _) => {
                if let Some(stale) = input.previous.and_then(|r| r.file_path.as_deref()) {
                    warn!(
                        "Previous artifact {} is missing, writing a fresh copy",
                        stale
                    );
                }
                let path = parser.save_to_file(input.novel, input.storage_folder).await?;
                let total = input.novel.chapters.len();
                info!("Wrote {} chapters to new artifact {}", total, path.display());
                Ok(MergeOutcome {
                    strategy,
                    file_path: Some(path),
                    total_chapters: total,
                    new_chapter_count: total,
                    already_exists,
                })
            }
            (MergeStrategy::LegacyRewrite, Some(path)) => {
                info!(
                    "No tracking rows for {}, rewriting it from the fetched chapter list",
                    path.display()
                );
                let total = input.novel.chapters.len();
                write_atomically(&path, &render_book(&input.novel.title, &input.novel.chapters))
                    .await?;
                Ok(MergeOutcome {
                    strategy,
                    file_path: Some(path),
                    total_chapters: total,
                    new_chapter_count: total.saturating_sub(previous_count),
                    already_exists,
                })
            }
            (MergeStrategy::IncrementalAppend, Some(path)) => {
                let mut text = tokio::fs::read_to_string(&path).await?;

                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                for chapter in input.new_chapters {
                    text.push_str(&render_chapter(chapter));
                }
                write_atomically(&path, &text).await?;

                info!(
                    "Appended {} chapters to {}",
                    input.new_chapters.len(),
                    path.display()
                );
                Ok(MergeOutcome {
                    strategy,
                    file_path: Some(path),
                    total_chapters: input.tracked_count + input.new_chapters.len(),
                    new_chapter_count: input.new_chapters.len(),
                    already_exists,
                })
            }
            (_, existing) => Ok(MergeOutcome {
                strategy: MergeStrategy::Unchanged,
                file_path: existing,
                total_chapters: previous_count,
                new_chapter_count: 0,
                already_exists,
            }),
        }
    }
}
