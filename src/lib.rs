//! # novelsync
//!
//! An incremental crawler for novels published chapter by chapter.
//!
//! ## Architecture
//!
//! Each crawl task walks its novel ids in order through one pipeline:
//!
//! ```text
//! SiteParser → Dedup (vs. chapter tracking) → ArtifactMerger → Store → TaskRegistry
//! ```
//!
//! Re-crawling a novel appends only the chapters that are not yet on disk.
//! Artifacts written before chapter tracking existed are repaired from their
//! headings, or rewritten whole when that is not possible.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show configured sites
//! novelsync sites
//!
//! # Crawl two novels
//! novelsync crawl --site example 1024 2048
//!
//! # Inspect what happened
//! novelsync history --site example --novel 1024
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: TOML configuration
//! - [`crawler`]: Task registry and crawl orchestration
//! - [`domain`]: Chapters, history records, crawl tasks
//! - [`store`]: SQLite persistence

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// the orchestrator and the task registry.
pub mod app;

/// Merged novel files on disk and the merge strategies applied to them.
pub mod artifact;

/// Command-line interface using clap.
///
/// - `crawl --site <id> <ids>...` - Crawl novels
/// - `history --site <id> [--novel <id>]` - Show crawl attempts
/// - `repair`, `purge`, `retitle` - Maintain tracking and history
/// - `sites` - List configured sites
pub mod cli;

/// Configuration loaded from `~/.config/novelsync/config.toml`.
pub mod config;

/// Crawl task execution.
///
/// - [`TaskRegistry`](crawler::TaskRegistry): submit, stop, observe and join tasks
/// - [`CrawlOrchestrator`](crawler::CrawlOrchestrator): the per-novel pipeline
pub mod crawler;

/// Splits fetched chapters into new and already tracked ones.
pub mod dedup;

/// Core domain models.
pub mod domain;

/// SHA-256 digests over chapter text and artifact files.
pub mod hasher;

/// The site-parser capability and its built-in implementations.
pub mod parser;

/// SQLite persistence layer.
///
/// - [`TrackingStore`](store::TrackingStore) and [`HistoryStore`](store::HistoryStore):
///   storage traits
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
