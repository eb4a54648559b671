use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{NovelSyncError, Result};
use crate::config::Config;
use crate::crawler::{CrawlOrchestrator, TaskRegistry};
use crate::parser::{BuiltinParsers, ParserFactory};
use crate::store::sqlite::SqliteStore;
use crate::store::CrawlStore;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub orchestrator: Arc<CrawlOrchestrator>,
    pub registry: TaskRegistry,
}

impl AppContext {
    /// Opens the configured database (or the default one). Must be called
    /// inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match config.database.path.clone() {
            Some(p) => {
                if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                p
            }
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path, &config.database)?);
        Ok(Self::with_parts(config, store, Arc::new(BuiltinParsers)))
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Ok(Self::with_parts(config, store, Arc::new(BuiltinParsers)))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<SqliteStore>,
        parsers: Arc<dyn ParserFactory>,
    ) -> Self {
        let shared: Arc<dyn CrawlStore> = store.clone();
        let orchestrator = Arc::new(CrawlOrchestrator::new(
            shared,
            config.sites.clone(),
            config.crawler.clone(),
            parsers,
        ));
        let registry = TaskRegistry::new(orchestrator.clone());

        Self {
            config,
            store,
            orchestrator,
            registry,
        }
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| NovelSyncError::Config("Could not find data directory".into()))?;
        let app_dir = data_dir.join("novelsync");
        std::fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("novelsync.db"))
    }
}
