//! Output formatting for CLI
//!
//! Every command prints through [`Output`] so `--json` and `--quiet` behave
//! the same everywhere.

use serde::Serialize;

use noticeboard_core::sync::{SubmitOutcome, SyncOutcome, UploadOutcome};
use noticeboard_core::{Attachment, Form, Notice, Response};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    Json,
    /// Minimal output for scripting
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

pub struct Output {
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to render JSON: {}", e),
        }
    }

    /// Print a single notice with its attachments
    pub fn print_notice(&self, notice: &Notice) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", notice.id);
                println!("Title:       {}", notice.title);
                println!("Category:    {}", notice.category);
                println!("Priority:    {}", notice.priority);
                println!("Date:        {}", notice.date);
                if let Some(deadline) = notice.deadline {
                    println!("Deadline:    {}", deadline);
                }
                if let Some(ref author) = notice.author {
                    println!("Author:      {}", author);
                }
                if !notice.tags.is_empty() {
                    println!("Tags:        {}", notice.tags.join(", "));
                }
                if notice.is_pinned() {
                    println!("Pinned:      #{}", notice.order);
                }
                if let Some(ref form_id) = notice.form_id {
                    println!("Form:        {}", form_id);
                }
                println!(
                    "Modified:    {}",
                    notice.last_modified.format("%Y-%m-%d %H:%M")
                );

                if !notice.content.is_empty() {
                    println!();
                    println!("{}", notice.content);
                }

                if !notice.attachments.is_empty() {
                    println!();
                    println!("── Attachments ({}) ──", notice.attachments.len());
                    for attachment in &notice.attachments {
                        println!("{}", describe_attachment(attachment));
                    }
                }
            }
            OutputFormat::Json => self.json(notice),
            OutputFormat::Quiet => println!("{}", notice.id),
        }
    }

    /// Print notices in display order
    pub fn print_notices(&self, notices: &[Notice]) {
        match self.format {
            OutputFormat::Human => {
                if notices.is_empty() {
                    println!("No notices found.");
                    return;
                }
                for notice in notices {
                    let pin = if notice.is_pinned() {
                        format!("#{:<2}", notice.order)
                    } else {
                        "   ".to_string()
                    };
                    let clip = if notice.attachments.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", notice.attachments.len())
                    };
                    println!(
                        "{} | {} | {:<8} | {}{}",
                        short_id(&notice.id),
                        pin,
                        notice.priority.to_string(),
                        truncate(&notice.title, 45),
                        clip
                    );
                }
                println!("\n{} notice(s)", notices.len());
            }
            OutputFormat::Json => self.json(notices),
            OutputFormat::Quiet => {
                for notice in notices {
                    println!("{}", notice.id);
                }
            }
        }
    }

    /// Print a form with its questions and a response count
    pub fn print_form(&self, form: &Form) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:          {}", form.id);
                println!("Title:       {}", form.title);
                if !form.description.is_empty() {
                    println!("Description: {}", truncate_line(&form.description, 60));
                }
                println!("Enabled:     {}", if form.enabled { "yes" } else { "no" });
                println!("Responses:   {}", form.responses.len());
                println!();
                for q in &form.questions {
                    let required = if q.required { " *" } else { "" };
                    println!("{}. [{}] {}{}", q.id, q.kind, q.question, required);
                    if !q.options.is_empty() {
                        println!("   options: {}", q.options.join(" | "));
                    }
                }
            }
            OutputFormat::Json => self.json(form),
            OutputFormat::Quiet => println!("{}", form.id),
        }
    }

    pub fn print_forms(&self, forms: &[Form]) {
        match self.format {
            OutputFormat::Human => {
                if forms.is_empty() {
                    println!("No forms found.");
                    return;
                }
                for form in forms {
                    println!(
                        "{} | {} | {} question(s), {} response(s){}",
                        short_id(&form.id),
                        truncate(&form.title, 40),
                        form.questions.len(),
                        form.responses.len(),
                        if form.enabled { "" } else { " (disabled)" }
                    );
                }
                println!("\n{} form(s)", forms.len());
            }
            OutputFormat::Json => self.json(forms),
            OutputFormat::Quiet => {
                for form in forms {
                    println!("{}", form.id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr unless quiet
    pub fn warn(&self, msg: &str) {
        if !self.is_quiet() {
            eprintln!("⚠ {}", msg);
        }
    }

    /// Report how publishing a change went. Remote trouble is never an error here.
    pub fn report_upload(&self, upload: &UploadOutcome) {
        match upload {
            UploadOutcome::Uploaded { bytes, oversized } => {
                if *oversized {
                    self.warn(&format!(
                        "Published, but the cloud document is large ({} bytes)",
                        bytes
                    ));
                } else {
                    self.message(&format!("Published to cloud ({} bytes)", bytes));
                }
            }
            UploadOutcome::Skipped(reason) => {
                self.message(&format!("Saved locally ({})", reason));
            }
            UploadOutcome::Failed(e) => {
                self.warn(&format!("Saved locally; {}", e.user_message()));
            }
        }
    }

    pub fn report_sync(&self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Synced { notices, forms } => {
                self.success(&format!(
                    "Synced with cloud: {} notice(s), {} form(s)",
                    notices, forms
                ));
            }
            SyncOutcome::RemoteMissing => {
                self.message("Cloud document not found; it will be created on the next push");
            }
            SyncOutcome::Skipped(reason) => {
                self.message(&format!("Sync skipped ({})", reason));
            }
            SyncOutcome::Failed(e) => {
                self.warn(&format!("Sync failed; {}", e.user_message()));
            }
        }
    }

    pub fn report_submission(&self, response: &Response, outcome: &SubmitOutcome) {
        if self.is_json() {
            let delivery = match outcome {
                SubmitOutcome::Delivered => "delivered".to_string(),
                SubmitOutcome::Queued { .. } => "queued".to_string(),
                SubmitOutcome::LocalOnly(_) => "local_only".to_string(),
                SubmitOutcome::Failed(e) => format!("failed: {}", e),
            };
            println!(
                "{}",
                serde_json::json!({"response": response, "delivery": delivery})
            );
            return;
        }

        if self.is_quiet() {
            println!("{}", response.id);
            return;
        }

        match outcome {
            SubmitOutcome::Delivered => self.success("Response submitted"),
            SubmitOutcome::Queued { reason } => {
                self.success("Response saved");
                self.warn(&format!("Will retry delivery in the background: {}", reason));
            }
            SubmitOutcome::LocalOnly(reason) => {
                self.success(&format!("Response saved locally ({})", reason));
            }
            SubmitOutcome::Failed(e) => {
                self.success("Response saved locally");
                self.warn(&e.user_message());
            }
        }
    }
}

fn describe_attachment(attachment: &Attachment) -> String {
    match attachment {
        Attachment::Inline(a) => {
            let compressed = match a.original_size {
                Some(original) if a.compressed => format!(", compressed from {}", human_size(original)),
                _ => String::new(),
            };
            format!("{} ({}, {}{})", a.name, a.mime_type, human_size(a.size), compressed)
        }
        Attachment::Hosted(a) => format!("{} ({}) -> {}", a.name, a.service, a.url),
        Attachment::Placeholder(a) => format!(
            "{} ({}, not synced: {})",
            a.name,
            human_size(a.original_size),
            truncate_line(&a.note, 50)
        ),
    }
}

/// First eight characters of an id
fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}
