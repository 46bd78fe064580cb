//! Terminal rendering for records and run results.
//!
//! Cards group a record's fields into sections and skip sections with no
//! data. Everything renders to a `String` first so the layout is testable.

use napscrape_core::{NapRecord, RecordState, RunSummary};
use napscrape_store::{ClearReport, RecordStore};

const MAX_LIST_ITEMS: usize = 10;
const TEXT_PREVIEW_CHARS: usize = 400;
const LABEL_WIDTH: usize = 20;

// ── Record card ──

/// A single record as a vertical card grouped by section.
pub fn record_card(record: &NapRecord) -> String {
    let mut lines = vec![format!("=== {} ===", record.country_name), String::new()];

    section(
        &mut lines,
        "Submission",
        &[
            ("nap_id", record.nap_id.clone()),
            ("slug", record.slug.clone()),
            ("region", record.region.clone()),
            ("ldc_sids", record.ldc_sids_marker.clone()),
            ("date_posted", record.date_posted.clone()),
        ],
    );
    section(
        &mut lines,
        "Document",
        &[
            ("languages", record.language_options.clone()),
            ("pdf_link", record.pdf_link.clone().unwrap_or_default()),
            (
                "pdf_path",
                record
                    .pdf_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
        ],
    );
    links(&mut lines, record);
    section(&mut lines, "Progress", &state_rows(&record.state));

    if let Some(text) = record.pdf_text() {
        lines.push("Text preview".to_string());
        lines.push(format!("  {}", preview(text, TEXT_PREVIEW_CHARS)));
        lines.push(String::new());
    }
    lines.join("\n") + "\n"
}

fn state_rows(state: &RecordState) -> Vec<(&'static str, String)> {
    let mut rows = vec![("status", state.as_str().to_string())];
    match state {
        RecordState::NotStarted => {}
        RecordState::Downloaded { bytes } => rows.push(("bytes", bytes.to_string())),
        RecordState::Extracted { pages, text } => {
            rows.push(("pages", pages.to_string()));
            rows.push(("characters", text.chars().count().to_string()));
        }
        RecordState::Failed {
            attempts, reason, ..
        } => {
            rows.push(("attempts", attempts.to_string()));
            rows.push(("reason", reason.clone()));
        }
    }
    rows
}

fn links(lines: &mut Vec<String>, record: &NapRecord) {
    let total = record.language_links.len();
    if total == 0 {
        return;
    }
    lines.push(format!("Language links ({total})"));
    for link in record.language_links.iter().take(MAX_LIST_ITEMS) {
        let selected = record.pdf_link.as_deref() == Some(link.href.as_str());
        let marker = if selected { "*" } else { " " };
        lines.push(format!(" {marker} {:<LABEL_WIDTH$} {}", link.label, link.href));
    }
    if total > MAX_LIST_ITEMS {
        lines.push(format!("    ... and {} more", total - MAX_LIST_ITEMS));
    }
    lines.push(String::new());
}

fn section(lines: &mut Vec<String>, header: &str, rows: &[(&str, String)]) {
    if rows.iter().all(|(_, value)| value.is_empty()) {
        return;
    }
    lines.push(header.to_string());
    lines.extend(
        rows.iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(label, value)| format!("  {label:<LABEL_WIDTH$} {value}")),
    );
    lines.push(String::new());
}

/// First `max` characters with whitespace collapsed, ellipsised if cut.
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

// ── Store status ──

/// One line per record: state, pages, country.
pub fn status_table(store: &RecordStore) -> String {
    let mut lines = vec![format!("{:<18} {:>6}  {}", "STATE", "PAGES", "COUNTRY")];
    lines.extend(store.iter().map(|record| {
        let pages = record
            .pdf_pages()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{:<18} {:>6}  {}",
            record.state.as_str(),
            pages,
            record.country_name
        )
    }));
    lines.push(String::new());
    lines.push(store.summary().to_string());
    lines.join("\n")
}

// ── Run results ──

pub fn summary_block(summary: &RunSummary) -> String {
    let mut out = summary.to_string();
    if summary.failures.is_empty() {
        return out;
    }
    out.push_str("\n\nNot processed:");
    for failure in &summary.failures {
        out.push_str(&format!(
            "\n  {:<24} {:?} after {} attempt(s): {}",
            failure.country_name, failure.stage, failure.attempts, failure.reason
        ));
    }
    out
}

pub fn clear_report(report: &ClearReport) -> String {
    let yes_no = |b: bool| if b { "removed" } else { "absent" };
    format!(
        "snapshot:  {}\npublished: {}\npdfs:      {} removed",
        yes_no(report.snapshot_removed),
        yes_no(report.published_removed),
        report.pdfs_removed
    )
}
