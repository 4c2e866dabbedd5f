#![forbid(unsafe_code)]

//! Tabular dump of a scrape, for people who want the rows without the
//! database.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::record::VideoRecord;

const CSV_HEADER: [&str; 7] = [
    "id",
    "title",
    "duration",
    "url",
    "published_date",
    "description",
    "channel_name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// Guesses the format from a file extension, defaulting to CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: usize,
    title: &'a str,
    duration: String,
    url: &'a str,
    published_date: Option<String>,
    description: &'a str,
    channel_name: &'a str,
}

fn export_rows(records: &[VideoRecord]) -> impl Iterator<Item = ExportRow<'_>> {
    records.iter().enumerate().map(|(index, record)| ExportRow {
        id: index + 1,
        title: &record.title,
        duration: record.duration.to_string(),
        url: &record.url,
        published_date: record.published_date_iso(),
        description: &record.description,
        channel_name: &record.channel_name,
    })
}

pub fn render(records: &[VideoRecord], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => Ok(render_csv(records)),
        ExportFormat::Json => {
            let rows: Vec<ExportRow<'_>> = export_rows(records).collect();
            serde_json::to_string_pretty(&rows).context("serializing export rows")
        }
    }
}

/// Writes the export and returns the number of rows written.
pub fn write_export(records: &[VideoRecord], path: &Path, format: ExportFormat) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let body = render(records, format)?;
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(rows = records.len(), path = %path.display(), "saved export");
    Ok(records.len())
}

fn render_csv(records: &[VideoRecord]) -> String {
    let mut out = String::new();
    push_csv_line(&mut out, CSV_HEADER.iter().copied());
    for row in export_rows(records) {
        let id = row.id.to_string();
        let published = row.published_date.unwrap_or_default();
        push_csv_line(
            &mut out,
            [
                id.as_str(),
                row.title,
                row.duration.as_str(),
                row.url,
                published.as_str(),
                row.description,
                row.channel_name,
            ],
        );
    }
    out
}

fn push_csv_line<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (index, field) in fields.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        push_csv_field(out, field);
    }
    out.push_str("\r\n");
}

// RFC 4180: quote when the field holds a separator, quote or line break.
fn push_csv_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\r', '\n']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}
