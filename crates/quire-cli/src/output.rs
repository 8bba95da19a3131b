//! Output formatting for command results.
//!
//! Commands build a serializable value and hand it to one of the printers
//! here; text output is colored unless color is disabled.

use anyhow::{Context, Result};
use colored::Colorize;
use quire_core::burst::BurstReport;
use quire_core::{
    Document, DocumentShell, GenerationResponse, SectionStatus, ShellWarning, TopicClassification,
    TopicScreen,
};
use serde::Serialize;

/// Output format options supported by the CLI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output to JSON")?;
    println!("{json}");
    Ok(())
}

/// Text rendering of a generation response.
pub fn print_response(response: &GenerationResponse) {
    print_shell(&response.shell);
    println!();
    println!("{} {}", "Document:".bold(), response.document_id);
    println!(
        "{} {} ({})",
        "Category:".bold(),
        response.classification.category,
        response.classification.subtitle.dimmed()
    );
    if response.resumed {
        println!("{}", "Resumed existing document".cyan());
    }
    if !response.remaining_sections.is_empty() {
        let label = if response.background_started {
            "Generating sections:"
        } else {
            "Remaining sections:"
        };
        println!("{} {}", label.bold(), join_indices(&response.remaining_sections));
    }
    print_warnings(&response.shell.warnings);
}

fn print_shell(shell: &DocumentShell) {
    println!("{}", shell.title.bold());
    println!("{}", shell.subtitle.italic());
    println!();
    for entry in &shell.table_of_contents {
        println!("  {:>2}. {}", entry.index, entry.title);
    }
    println!();
    println!("{}", shell.first_section_content);
    if !shell.auxiliary_resources.is_empty() {
        println!();
        println!("{}", "Further reading:".bold());
        for resource in &shell.auxiliary_resources {
            println!("  - {resource}");
        }
    }
}

fn print_warnings(warnings: &[ShellWarning]) {
    for warning in warnings {
        eprintln!("{} {}", "warning:".yellow(), describe_warning(warning));
    }
}

fn describe_warning(warning: &ShellWarning) -> String {
    match warning {
        ShellWarning::ControlCharactersStripped { count } => {
            format!("removed {count} control characters from the response")
        },
        ShellWarning::NoJsonObject => "response contained no JSON object".to_string(),
        ShellWarning::StrictParseFailed { detail } => format!("response was not valid JSON ({detail})"),
        ShellWarning::FieldRecovered { field } => format!("recovered {field} from malformed output"),
        ShellWarning::FieldDefaulted { field } => format!("{field} was missing; a default was used"),
        ShellWarning::OutlineRenumbered => "outline indices were renumbered".to_string(),
        ShellWarning::TrademarkReference { term } => {
            format!("topic references the trademark \"{term}\"")
        },
    }
}

/// Text rendering of a finished burst.
pub fn print_report(report: &BurstReport) {
    let persisted = report.indices(SectionStatus::Persisted);
    let failed = report.indices(SectionStatus::Failed);
    let pending = report.indices(SectionStatus::Pending);

    if report.cancelled {
        println!("{}", "Background generation was interrupted".yellow());
    }
    if !persisted.is_empty() {
        println!("{} {}", "Persisted:".green(), join_indices(&persisted));
    }
    if !failed.is_empty() {
        println!("{} {}", "Failed:".red(), join_indices(&failed));
        for task in report.sections.iter().filter(|task| task.status == SectionStatus::Failed) {
            if let Some(reason) = &task.failure {
                println!("  {:>2}. {}", task.index, reason.dimmed());
            }
        }
    }
    if !pending.is_empty() {
        println!("{} {}", "Not started:".yellow(), join_indices(&pending));
    }
    if !failed.is_empty() || !pending.is_empty() {
        println!(
            "Run again with --full --document-id {} to resume.",
            report.document_id
        );
    }
}

/// Text rendering of a stored document.
pub fn print_document(document: &Document, with_content: bool) {
    println!("{}", document.shell.title.bold());
    println!("{}", document.shell.subtitle.italic());
    println!();
    for entry in &document.shell.table_of_contents {
        let status = document.section_status(entry.index);
        println!("  {:>2}. {:<48} {}", entry.index, entry.title, paint_status(status));
        if with_content {
            if let Some(content) = document.section_content(entry.index) {
                println!();
                println!("{content}");
                println!();
            }
        }
    }
    if let Some(reason) = document
        .sections
        .values()
        .find_map(|record| record.failure.as_deref())
    {
        println!();
        println!("{} {}", "Last failure:".red(), reason);
    }
}

/// Text rendering of a classification.
pub fn print_classification(
    topic: &str,
    classification: &TopicClassification,
    matched_pattern: bool,
    screen: &TopicScreen,
) {
    println!("{} {}", "Topic:".bold(), topic);
    if matched_pattern {
        println!("{} {}", "Category:".bold(), classification.category);
    } else {
        println!("{} {} (default)", "Category:".bold(), classification.category);
    }
    println!("{} {}", "Subtitle:".bold(), classification.subtitle);
    match &screen.allow_listed {
        Some(term) => println!("{} yes (\"{term}\")", "Allow-listed:".bold()),
        None => println!("{} no; a backend safety check would run", "Allow-listed:".bold()),
    }
    if !screen.trademarks.is_empty() {
        println!("{} {}", "Trademarks:".bold(), screen.trademarks.join(", ").yellow());
    }
}

fn paint_status(status: SectionStatus) -> colored::ColoredString {
    let label = status.to_string();
    match status {
        SectionStatus::Persisted => label.green(),
        SectionStatus::Failed => label.red(),
        SectionStatus::InProgress => label.cyan(),
        SectionStatus::Pending => label.yellow(),
    }
}

fn join_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
