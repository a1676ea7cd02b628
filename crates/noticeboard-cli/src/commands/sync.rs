//! Sync command handlers
//!
//! Cloud trouble is reported but never turns into a failing exit code; only
//! local storage errors do.

use anyhow::Result;

use noticeboard_core::sync::UploadOutcome;

use crate::output::{Output, OutputFormat};
use crate::Board;

/// Pull the cloud document and merge it into local data
pub async fn sync(board: &Board, output: &Output) -> Result<()> {
    if !board.has_remote() {
        output.message(
            "Cloud sync is not configured. Set it up with:\n  \
             noticeboard config set remote_base_url https://json-host.example/api\n  \
             noticeboard config set document_id <id>\n  \
             noticeboard config set sync_enabled true",
        );
        return Ok(());
    }

    output.message("Syncing with cloud...");
    let outcome = board.sync_with_cloud().await?;
    output.report_sync(&outcome);

    // Anything left over from an earlier offline session
    if board.pending_retries().await > 0 {
        let summary = board.process_retry_queue().await?;
        if summary.succeeded > 0 {
            output.message(&format!("Delivered {} queued response(s)", summary.succeeded));
        }
    }
    Ok(())
}

/// Publish the local board to the cloud
pub async fn push(board: &Board, output: &Output) -> Result<()> {
    let upload = board.upload_to_cloud().await?;
    if let UploadOutcome::Uploaded { .. } = upload {
        output.success("Pushed local board to cloud");
    }
    output.report_upload(&upload);
    Ok(())
}

/// Run one retry pass, or show the failed log
pub async fn retry(board: &Board, show_failed: bool, output: &Output) -> Result<()> {
    if show_failed {
        let failed = board.failed_log().await?;
        match output.format {
            OutputFormat::Json => output.json(&failed),
            OutputFormat::Quiet => println!("{}", failed.len()),
            OutputFormat::Human => {
                if failed.is_empty() {
                    println!("No failed submissions.");
                }
                for entry in &failed {
                    println!(
                        "[{}] {} after {} attempt(s): {}",
                        entry.failed_at.format("%Y-%m-%d %H:%M"),
                        entry.item.kind,
                        entry.item.attempts,
                        entry.reason
                    );
                }
            }
        }
        return Ok(());
    }

    let pending = board.pending_retries().await;
    if pending == 0 {
        output.message("Retry queue is empty");
        return Ok(());
    }

    let summary = board.process_retry_queue().await?;
    match output.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "succeeded": summary.succeeded,
                "failed": summary.failed,
                "archived": summary.archived,
                "remaining": summary.remaining
            })
        ),
        OutputFormat::Quiet => println!("{}", summary.remaining),
        OutputFormat::Human => {
            println!("Delivered: {}", summary.succeeded);
            println!("Failed:    {}", summary.failed);
            if summary.archived > 0 {
                println!("Given up:  {} (see `noticeboard retry --failed`)", summary.archived);
            }
            println!("Remaining: {}", summary.remaining);
        }
    }
    Ok(())
}
