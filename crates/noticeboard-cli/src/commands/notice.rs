//! Notice command handlers

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;

use noticeboard_core::{Attachment, Category, InlineAttachment, Notice, Priority};

use crate::output::Output;
use crate::Board;

/// Fields for a new notice
pub struct NoticeInput {
    pub title: String,
    pub content: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub tags: Vec<String>,
    pub pin: Option<u32>,
    pub deadline: Option<String>,
    pub author: Option<String>,
    pub attachments: Vec<PathBuf>,
    pub form: Option<String>,
}

/// Changes to apply to an existing notice; `None` leaves a field alone
pub struct NoticeChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub add_tags: Vec<String>,
    pub remove_tags: Vec<String>,
    pub deadline: Option<String>,
    pub attachments: Vec<PathBuf>,
    pub form: Option<String>,
}

/// Post a new notice
pub async fn add(board: &Board, input: NoticeInput, output: &Output) -> Result<()> {
    if input.title.trim().is_empty() {
        bail!("Notice title cannot be empty");
    }
    if let Some(pin) = input.pin {
        check_pin(pin)?;
    }

    let mut notice = Notice::new(input.title.trim());
    if let Some(content) = input.content {
        notice.content = content;
    }
    if let Some(category) = input.category {
        notice.category = parse_category(&category)?;
    }
    if let Some(priority) = input.priority {
        notice.priority = parse_priority(&priority)?;
    }
    for tag in input.tags {
        notice.add_tag(tag);
    }
    if let Some(deadline) = input.deadline {
        notice.deadline = parse_deadline(&deadline)?;
    }
    notice.author = input.author;
    for path in &input.attachments {
        notice.add_attachment(read_attachment(path)?);
    }
    if let Some(form) = input.form {
        notice.attach_form(resolve_form(board, &form).await?);
    }

    let published = board.create_notice(notice, input.pin).await?;
    output.success(&format!("Posted notice: {}", published.value.title));
    if !output.is_json() && !output.is_quiet() {
        println!("  ID: {}", published.value.id);
        if published.value.is_pinned() {
            println!("  Pinned at #{}", published.value.order);
        }
    } else if output.is_quiet() {
        println!("{}", published.value.id);
    }
    output.report_upload(&published.upload);
    Ok(())
}

/// List notices, optionally filtered
pub async fn list(
    board: &Board,
    category: Option<String>,
    tag: Option<String>,
    output: &Output,
) -> Result<()> {
    let category = category.map(|c| parse_category(&c)).transpose()?;
    let notices: Vec<Notice> = board
        .store()
        .lock()
        .await
        .notices_sorted()
        .into_iter()
        .filter(|n| category.as_ref().map_or(true, |c| &n.category == c))
        .filter(|n| tag.as_ref().map_or(true, |t| n.tags.contains(t)))
        .collect();

    output.print_notices(&notices);
    Ok(())
}

pub async fn show(board: &Board, id: String, output: &Output) -> Result<()> {
    let notice = find(board, &id).await?;
    output.print_notice(&notice);
    Ok(())
}

/// Apply changes to an existing notice
pub async fn update(board: &Board, id: String, changes: NoticeChanges, output: &Output) -> Result<()> {
    let mut notice = find(board, &id).await?;

    if let Some(title) = changes.title {
        if title.trim().is_empty() {
            bail!("Notice title cannot be empty");
        }
        notice.set_title(title.trim());
    }
    if let Some(content) = changes.content {
        notice.set_content(content);
    }
    if let Some(category) = changes.category {
        notice.category = parse_category(&category)?;
    }
    if let Some(priority) = changes.priority {
        notice.priority = parse_priority(&priority)?;
    }
    for tag in changes.add_tags {
        notice.add_tag(tag);
    }
    for tag in &changes.remove_tags {
        notice.remove_tag(tag);
    }
    if let Some(deadline) = changes.deadline {
        notice.deadline = parse_deadline(&deadline)?;
    }
    for path in &changes.attachments {
        notice.add_attachment(read_attachment(path)?);
    }
    match changes.form.as_deref() {
        Some("none") | Some("") => {
            notice.form_id = None;
            notice.form_capture_enabled = false;
        }
        Some(form) => notice.attach_form(resolve_form(board, form).await?),
        None => {}
    }

    let published = board.update_notice(notice).await?;
    output.success(&format!("Updated notice: {}", published.value.title));
    output.report_upload(&published.upload);
    Ok(())
}

/// Pin to a reserved position, or unpin when no position is given
pub async fn pin(board: &Board, id: String, position: Option<u32>, output: &Output) -> Result<()> {
    if let Some(position) = position {
        check_pin(position)?;
    }
    let notice = find(board, &id).await?;
    let published = board.set_order(&notice.id, position).await?;

    match position {
        Some(_) => output.success(&format!("Pinned '{}' at #{}", notice.title, published.value)),
        None => output.success(&format!("Unpinned '{}'", notice.title)),
    }
    output.report_upload(&published.upload);
    Ok(())
}

pub async fn delete(board: &Board, id: String, output: &Output) -> Result<()> {
    let notice = find(board, &id).await?;
    let published = board.delete_notice(&notice.id).await?;
    output.success(&format!("Deleted notice: {}", published.value.title));
    output.report_upload(&published.upload);
    Ok(())
}

async fn find(board: &Board, id: &str) -> Result<Notice> {
    board
        .store()
        .lock()
        .await
        .find_notice(id)
        .cloned()
        .ok_or_else(|| anyhow!("Notice not found: {}", id))
}

async fn resolve_form(board: &Board, id: &str) -> Result<String> {
    board
        .store()
        .lock()
        .await
        .find_form(id)
        .map(|f| f.id.clone())
        .ok_or_else(|| anyhow!("Form not found: {}", id))
}

fn check_pin(position: u32) -> Result<()> {
    if !noticeboard_core::models::RESERVED_POSITIONS.contains(&position) {
        bail!("Pinned positions are 1 to 3, got {}", position);
    }
    Ok(())
}

fn parse_category(value: &str) -> Result<Category> {
    value.parse().map_err(|e: String| anyhow!(e))
}

fn parse_priority(value: &str) -> Result<Priority> {
    value.parse().map_err(|e: String| anyhow!(e))
}

/// Parse a deadline, where "none" clears it
fn parse_deadline(value: &str) -> Result<Option<NaiveDate>> {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(Some)
        .with_context(|| format!("Invalid deadline '{}', expected YYYY-MM-DD", value))
}

/// Read a file from disk into an inline attachment
fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read attachment: {:?}", path))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Not a file: {:?}", path))?;
    Ok(Attachment::Inline(InlineAttachment::from_bytes(
        name,
        mime_for(path),
        &bytes,
    )))
}

/// MIME type from the file extension
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}
