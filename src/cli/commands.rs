use tokio::sync::mpsc;

use crate::app::{AppContext, NovelSyncError, Result};
use crate::domain::{CrawlHistoryRecord, CrawlTask, HistoryUpdate, ProxyConfig, TaskStatus};
use crate::store::{HistoryStore, TrackingStore};

pub async fn crawl(
    ctx: &AppContext,
    site_id: &str,
    proxy: Option<String>,
    novel_ids: Vec<String>,
) -> Result<CrawlTask> {
    let site = ctx
        .config
        .site(site_id)
        .ok_or_else(|| NovelSyncError::SiteNotFound(site_id.to_string()))?;
    println!("Crawling {} novels from {}", novel_ids.len(), site.display_name());

    ctx.registry.register_success_observer(|success| {
        if success.already_exists {
            println!(
                "  Updated: {} (+{} chapters)",
                success.title, success.new_chapters
            );
        } else {
            println!("  New: {} ({} chapters)", success.title, success.new_chapters);
        }
    });

    // The terminal status arrives after every success notification of the
    // task, so waiting on it means all output above has been printed.
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    ctx.registry.register_status_observer(move |task| {
        if task.status.is_terminal() {
            let _ = done_tx.send(task.id.clone());
        }
    });

    let proxy = proxy.map(ProxyConfig::from_url).unwrap_or_default();
    let task_id = ctx.registry.submit(site_id, novel_ids, proxy);

    // Ctrl-C only requests a stop. The task keeps its join handle either way
    // and is reaped below once it reports a terminal status.
    let finished = wait_for_terminal(&mut done_rx, &task_id);
    tokio::pin!(finished);
    tokio::select! {
        _ = &mut finished => {}
        _ = tokio::signal::ctrl_c() => {
            if ctx.registry.stop(&task_id) {
                println!("Stopping after the current novel...");
            }
            (&mut finished).await;
        }
    }
    let task = ctx.registry.join(&task_id).await?;

    match task.status {
        TaskStatus::Failed => eprintln!(
            "Crawl failed: {}",
            task.error_message.as_deref().unwrap_or("unknown error")
        ),
        status => println!(
            "Crawl {}: {} succeeded, {} failed, {}/{} processed",
            status.as_str(),
            task.success_count,
            task.failed_count,
            task.progress,
            task.total
        ),
    }
    Ok(task)
}

async fn wait_for_terminal(rx: &mut mpsc::UnboundedReceiver<String>, task_id: &str) {
    while let Some(id) = rx.recv().await {
        if id == task_id {
            break;
        }
    }
}

pub fn history(ctx: &AppContext, site_id: &str, novel_id: Option<&str>, limit: usize) -> Result<()> {
    let records = match novel_id {
        Some(novel_id) => {
            let mut records = ctx.store.history_for_novel(site_id, novel_id)?;
            records.truncate(limit);
            records
        }
        None => ctx.store.recent_history(site_id, limit)?,
    };

    if records.is_empty() {
        println!("No crawl history");
        return Ok(());
    }

    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &CrawlHistoryRecord) -> String {
    let detail = if record.is_success() {
        format!(
            "{} chapters{}",
            record.chapter_count,
            record
                .file_path
                .as_deref()
                .map(|p| format!(" -> {}", p))
                .unwrap_or_default()
        )
    } else {
        record.error_message.clone().unwrap_or_default()
    };

    let status = if record.is_skip_marker() {
        "skipped"
    } else {
        record.status.as_str()
    };
    format!(
        "#{:<5} {} {:<7} {} [{}] {}",
        record.id,
        record.crawl_time.format("%Y-%m-%d %H:%M"),
        status,
        record.novel_title,
        record.novel_id,
        detail
    )
}

pub fn repair(ctx: &AppContext, site_id: &str, novel_id: &str) -> Result<()> {
    let report = ctx.store.repair_from_artifact(site_id, novel_id)?;
    if report.success {
        println!("Repaired tracking: {} chapters", report.count);
    } else {
        println!("Nothing repaired: {}", report.reason);
    }
    Ok(())
}

pub fn purge(ctx: &AppContext, site_id: &str, novel_id: &str) -> Result<()> {
    let removed = ctx.store.purge_novel(site_id, novel_id)?;
    println!("Removed {} history records for {}", removed, novel_id);
    Ok(())
}

pub fn retitle(ctx: &AppContext, id: i64, title: &str) -> Result<()> {
    let update = HistoryUpdate {
        novel_title: Some(title.to_string()),
        ..Default::default()
    };
    if !ctx.store.update_record(id, &update)? {
        return Err(NovelSyncError::Other(format!("No history record with id {}", id)));
    }
    println!("Record #{} retitled to {}", id, title);
    Ok(())
}

pub fn list_sites(ctx: &AppContext) -> Result<()> {
    if ctx.config.sites.is_empty() {
        println!("No sites configured");
        return Ok(());
    }

    for site in &ctx.config.sites {
        println!(
            "{} ({}, parser: {})\n  {}\n  -> {}",
            site.display_name(),
            site.id,
            site.parser,
            site.url,
            site.storage_path().display()
        );
    }
    Ok(())
}
