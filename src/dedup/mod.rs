//! Splits a freshly fetched chapter list into new and already-merged chapters.

use std::collections::HashSet;

use crate::domain::{Chapter, TrackedChapters};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    /// Chapters not yet in the artifact, in fetch order.
    pub new_chapters: Vec<Chapter>,
    pub duplicate_count: usize,
}

/// Partitions `chapters` against the tracked rows.
///
/// A chapter is a duplicate when its fetch index is tracked with the same
/// content hash, or when any tracked row shares its title or content hash.
/// The second check catches sites that renumber chapters between crawls.
pub fn partition(chapters: &[Chapter], tracked: &TrackedChapters) -> Partition {
    let known_titles: HashSet<&str> = tracked.values().map(|t| t.title.as_str()).collect();
    let known_hashes: HashSet<&str> = tracked
        .values()
        .map(|t| t.content_hash.as_str())
        .collect();

    let mut result = Partition::default();

    for (index, chapter) in chapters.iter().enumerate() {
        let hash = chapter.content_hash();

        let same_slot = tracked
            .get(&index)
            .is_some_and(|t| t.content_hash == hash);
        let seen_elsewhere = known_titles.contains(chapter.title.as_str())
            || known_hashes.contains(hash.as_str());

        if same_slot || seen_elsewhere {
            result.duplicate_count += 1;
        } else {
            result.new_chapters.push(chapter.clone());
        }
    }

    result
}
