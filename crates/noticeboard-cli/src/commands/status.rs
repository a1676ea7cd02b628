//! Status command handler

use anyhow::Result;

use crate::output::{Output, OutputFormat};
use crate::Board;

/// Show sync status and what's stored locally
pub async fn show(board: &Board, output: &Output) -> Result<()> {
    let config = board.config();
    let snapshot = board.status().current();
    let pending = board.pending_retries().await;

    let store = board.store().lock().await;
    let last_sync = store.last_sync();
    let analytics = store.submission_analytics()?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "status": snapshot.status,
                    "message": snapshot.message,
                    "sync_enabled": config.sync_enabled,
                    "document_url": config.document_url(),
                    "cloud_write_enabled": board.cloud_write_enabled(),
                    "last_sync": last_sync,
                    "pending_retries": pending,
                    "counts": {
                        "notices": store.notice_count(),
                        "forms": store.form_count(),
                        "responses": store.response_count()
                    },
                    "submissions": analytics
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", snapshot.status);
        }
        OutputFormat::Human => {
            println!("Notice Board Status");
            println!("===================");
            println!();
            println!("Sync:");
            println!("  Status:    {}", snapshot.display_text());
            println!(
                "  Enabled:   {}",
                if config.sync_enabled { "yes" } else { "no" }
            );
            if let Some(url) = config.document_url() {
                println!("  Document:  {}", url);
            }
            println!(
                "  Last sync: {}",
                last_sync
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string())
            );
            if pending > 0 {
                println!("  Queued:    {} response(s) awaiting delivery", pending);
            }
            println!();
            println!("Storage:");
            println!("  Location:  {}", config.data_dir.display());
            println!();
            println!("Contents:");
            println!("  Notices:   {}", store.notice_count());
            println!("  Forms:     {}", store.form_count());
            println!("  Responses: {}", store.response_count());

            if !analytics.is_empty() {
                println!();
                println!("Submissions from this device:");
                for (form_id, stats) in &analytics {
                    let title = store
                        .form(form_id)
                        .map(|f| f.title.as_str())
                        .unwrap_or("(deleted form)");
                    println!("  {}: {}", title, stats.count);
                }
            }
        }
    }

    Ok(())
}
