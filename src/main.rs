use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use novelsync::app::AppContext;
use novelsync::cli::{commands, Cli, Commands};
use novelsync::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Crawl { site, proxy, ids } => {
            commands::crawl(&ctx, &site, proxy, ids).await?;
        }
        Commands::History { site, novel, limit } => {
            commands::history(&ctx, &site, novel.as_deref(), limit)?;
        }
        Commands::Repair { site, novel } => {
            commands::repair(&ctx, &site, &novel)?;
        }
        Commands::Purge { site, novel } => {
            commands::purge(&ctx, &site, &novel)?;
        }
        Commands::Retitle { id, title } => {
            commands::retitle(&ctx, id, &title)?;
        }
        Commands::Sites => {
            commands::list_sites(&ctx)?;
        }
    }

    Ok(())
}
