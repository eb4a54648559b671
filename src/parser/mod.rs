//! The site-parsing capability the crawl engine consumes.
//!
//! Per-site HTML adapters live outside this crate; they plug in through
//! [`SiteParser`] and are resolved per task by a [`ParserFactory`].

mod json;

pub use json::JsonSiteParser;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::{NovelSyncError, Result};
use crate::artifact;
use crate::config::SiteConfig;
use crate::domain::{Chapter, ProxyConfig};

/// A novel's metadata and full chapter list as fetched from a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedNovel {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[async_trait]
pub trait SiteParser: Send + Sync {
    fn name(&self) -> &str;

    /// Clears any counters carried over from the previous novel. Called once
    /// before each novel when a parser instance is reused across a task.
    fn reset_per_book_state(&self) {}

    async fn parse_novel_detail(&self, novel_id: &str) -> Result<ParsedNovel>;

    /// Writes a first-crawl artifact and returns its path.
    async fn save_to_file(&self, novel: &ParsedNovel, storage_folder: &Path) -> Result<PathBuf> {
        let path = artifact::write_new(storage_folder, &novel.title, &novel.chapters).await?;
        Ok(path)
    }
}

/// Resolves a configured site into a parser instance for one task.
pub trait ParserFactory: Send + Sync {
    fn create(&self, site: &SiteConfig, proxy: &ProxyConfig) -> Result<Box<dyn SiteParser>>;
}

/// Parser kinds shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinParsers;

impl ParserFactory for BuiltinParsers {
    fn create(&self, site: &SiteConfig, proxy: &ProxyConfig) -> Result<Box<dyn SiteParser>> {
        match site.parser.as_str() {
            "json" => Ok(Box::new(JsonSiteParser::new(site, proxy)?)),
            other => Err(NovelSyncError::UnknownParser(other.to_string())),
        }
    }
}
