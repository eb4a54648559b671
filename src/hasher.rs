//! SHA-256 digests for chapter text and whole artifacts.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Digest of a chapter body.
///
/// Line endings are normalized to `\n`, trailing whitespace is stripped from
/// every line and blank lines at either end are dropped, so re-serialized
/// copies of the same text hash identically.
pub fn hash_content(text: &str) -> String {
    let mut hasher = Sha256::new();
    let normalized = normalize(text);
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest of a file's raw bytes.
pub fn hash_file<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn normalize(text: &str) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
    lines[start..end].join("\n")
}
