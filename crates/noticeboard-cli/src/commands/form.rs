//! Form command handlers

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context, Result};

use noticeboard_core::{Answer, EditingSession, Form, QuestionKind};

use crate::output::Output;
use crate::Board;

pub async fn list(board: &Board, output: &Output) -> Result<()> {
    let forms = board.store().lock().await.forms().to_vec();
    output.print_forms(&forms);
    Ok(())
}

pub async fn show(board: &Board, id: String, output: &Output) -> Result<()> {
    let form = find(board, &id).await?;
    output.print_form(&form);
    Ok(())
}

/// Build a form from question specs and save it
pub async fn create(
    board: &Board,
    title: String,
    description: Option<String>,
    questions: Vec<String>,
    output: &Output,
) -> Result<()> {
    let mut session = EditingSession::new_form(title.trim());
    let draft = session
        .draft_mut()
        .ok_or_else(|| anyhow!("No form is being built"))?;
    if let Some(description) = description {
        draft.description = description;
    }
    for spec in &questions {
        let (kind, text, required, options) = parse_question(spec)?;
        draft.add_question(kind, text, required, options);
    }

    let EditingSession::BuildingForm { draft, .. } = session.finish() else {
        bail!("No form is being built");
    };
    let form = draft.build()?;
    let published = board.save_form(form).await?;

    output.success(&format!("Created form: {}", published.value.title));
    if output.is_quiet() {
        println!("{}", published.value.id);
    } else if !output.is_json() {
        println!("  ID: {}", published.value.id);
    }
    output.report_upload(&published.upload);
    Ok(())
}

pub async fn set_enabled(board: &Board, id: String, enabled: bool, output: &Output) -> Result<()> {
    let mut form = find(board, &id).await?;
    form.enabled = enabled;
    let published = board.save_form(form).await?;

    let state = if enabled { "enabled" } else { "disabled" };
    output.success(&format!("Form {}: {}", state, published.value.title));
    output.report_upload(&published.upload);
    Ok(())
}

pub async fn delete(board: &Board, id: String, output: &Output) -> Result<()> {
    let form = find(board, &id).await?;
    let published = board.delete_form(&form.id).await?;
    output.success(&format!("Deleted form: {}", published.value.title));
    output.report_upload(&published.upload);
    Ok(())
}

/// Submit a response; delivery problems are reported, not returned
pub async fn respond(board: &Board, id: String, answers: Vec<String>, output: &Output) -> Result<()> {
    let form = find(board, &id).await?;
    let answers = parse_answers(&form, &answers)?;

    let (response, outcome) = board
        .submit_form_response(&form.id, answers, &device_info())
        .await?;
    output.report_submission(&response, &outcome);
    Ok(())
}

async fn find(board: &Board, id: &str) -> Result<Form> {
    board
        .store()
        .lock()
        .await
        .find_form(id)
        .cloned()
        .ok_or_else(|| anyhow!("Form not found: {}", id))
}

/// Parse `KIND[*]:QUESTION[:OPT1|OPT2...]`
fn parse_question(spec: &str) -> Result<(QuestionKind, String, bool, Vec<String>)> {
    let mut parts = spec.splitn(3, ':');
    let (Some(kind), Some(text)) = (parts.next(), parts.next()) else {
        bail!("Invalid question '{}', expected KIND:QUESTION[:OPTIONS]", spec);
    };

    let (kind, required) = match kind.trim().strip_suffix('*') {
        Some(kind) => (kind, true),
        None => (kind.trim(), false),
    };
    let kind: QuestionKind = kind.parse().map_err(|e: String| anyhow!(e))?;

    let options = parts
        .next()
        .map(|opts| {
            opts.split('|')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok((kind, text.trim().to_string(), required, options))
}

/// Parse `ID=VALUE` answers, splitting checkbox values on commas
fn parse_answers(form: &Form, raw: &[String]) -> Result<BTreeMap<u32, Answer>> {
    let mut answers = BTreeMap::new();
    for entry in raw {
        let (id, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid answer '{}', expected ID=VALUE", entry))?;
        let id: u32 = id
            .trim()
            .parse()
            .with_context(|| format!("Invalid question id in '{}'", entry))?;

        let answer = match form.question(id).map(|q| q.kind) {
            Some(QuestionKind::Checkbox) => Answer::Multiple(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            _ => Answer::Single(value.to_string()),
        };
        answers.insert(id, answer);
    }
    Ok(answers)
}

fn device_info() -> String {
    format!(
        "noticeboard-cli/{} ({} {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
