pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "novelsync")]
#[command(about = "Incremental crawler for serialized novels", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/novelsync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl novels from a configured site
    Crawl {
        /// Site id from the config file
        #[arg(short, long)]
        site: String,

        /// Proxy URL passed to the site parser
        #[arg(long)]
        proxy: Option<String>,

        /// Novel ids, crawled in order
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show crawl history
    History {
        #[arg(short, long)]
        site: String,

        /// Only this novel
        #[arg(short, long)]
        novel: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Rebuild chapter tracking from a novel's existing artifact
    Repair {
        #[arg(short, long)]
        site: String,

        #[arg(short, long)]
        novel: String,
    },
    /// Delete a novel's history and chapter tracking (the artifact is kept)
    Purge {
        #[arg(short, long)]
        site: String,

        #[arg(short, long)]
        novel: String,
    },
    /// Correct the title stored on a history record
    Retitle {
        /// History record id
        #[arg(long)]
        id: i64,

        #[arg(long)]
        title: String,
    },
    /// List configured sites
    Sites,
}
