//! On-disk novel artifacts.
//!
//! An artifact is a UTF-8 text file:
//!
//! ```text
//! # Book Title
//!
//! ## Chapter One
//!
//! body...
//!
//! ## Chapter Two
//! ...
//! ```
//!
//! Chapter headings (`## `) are the only structure recoverable from an
//! existing file, which is what the tracking repair relies on.

mod merger;

pub use merger::{ArtifactMerger, MergeInput, MergeOutcome, MergeStrategy};

use std::io;
use std::path::{Path, PathBuf};

use crate::domain::Chapter;

const HEADING_PREFIX: &str = "## ";

pub fn render_book(title: &str, chapters: &[Chapter]) -> String {
    let mut text = format!("# {}\n\n", title);
    for chapter in chapters {
        text.push_str(&render_chapter(chapter));
    }
    text
}

pub fn render_chapter(chapter: &Chapter) -> String {
    format!("{}{}\n\n{}\n\n", HEADING_PREFIX, chapter.title, chapter.content)
}

/// Chapter titles found in an artifact, in file order.
pub fn scan_headings(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.strip_prefix(HEADING_PREFIX))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .collect()
}

pub fn sanitize_file_name(title: &str) -> String {
    let name: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

/// Writes a brand-new artifact under `folder`, never overwriting an existing
/// file: `Title.txt` becomes `Title_1.txt`, `Title_2.txt`, ... when taken.
pub async fn write_new(folder: &Path, title: &str, chapters: &[Chapter]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(folder).await?;

    let stem = sanitize_file_name(title);
    let mut path = folder.join(format!("{}.txt", stem));
    let mut counter = 1;
    while tokio::fs::try_exists(&path).await? {
        path = folder.join(format!("{}_{}.txt", stem, counter));
        counter += 1;
    }

    write_atomically(&path, &render_book(title, chapters)).await?;
    Ok(path)
}

/// Replaces `path` with `contents` via a sibling temp file and a rename.
pub async fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "artifact path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".partial");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
