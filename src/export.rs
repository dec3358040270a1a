//! Serializes record sets as JSON or CSV.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use clap::ValueEnum;
use csv::QuoteStyle;

use crate::{data::Record, profile::field_paths};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Writes `records` to `writer`. CSV output uses the union of leaf paths as
/// its header; absent fields are written as empty cells.
pub fn export_records<W: Write>(
    records: &[Record],
    format: ExportFormat,
    mut writer: W,
) -> Result<()> {
    match format {
        ExportFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, records)
                .context("Serializing records as JSON")?;
            writeln!(writer)?;
        }
        ExportFormat::Csv => {
            let headers = field_paths(records);
            let mut csv_writer = csv::WriterBuilder::new()
                .quote_style(QuoteStyle::Necessary)
                .from_writer(&mut writer);
            if !headers.is_empty() {
                csv_writer
                    .write_record(&headers)
                    .context("Writing CSV header")?;
            }
            for (idx, record) in records.iter().enumerate() {
                let cells = headers
                    .iter()
                    .map(|path| record.value(path).as_display());
                csv_writer
                    .write_record(cells)
                    .with_context(|| format!("Writing CSV row {}", idx + 1))?;
            }
            csv_writer.flush().context("Flushing CSV output")?;
        }
    }
    writer.flush().context("Flushing export output")
}

pub fn export_to_string(records: &[Record], format: ExportFormat) -> Result<String> {
    let mut buffer = Vec::new();
    export_records(records, format, &mut buffer)?;
    String::from_utf8(buffer).context("Export produced invalid UTF-8")
}

/// Exports to `path`, or stdout when `path` is `None` or `-`.
pub fn write_records(
    records: &[Record],
    format: ExportFormat,
    path: Option<&Path>,
) -> Result<()> {
    match path {
        Some(p) if p != Path::new("-") => {
            let file = File::create(p).with_context(|| format!("Creating output file {p:?}"))?;
            export_records(records, format, BufWriter::new(file))
                .with_context(|| format!("Writing records to {p:?}"))
        }
        _ => export_records(records, format, std::io::stdout().lock()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Value, normalize_record};
    use serde_json::json;

    #[test]
    fn csv_uses_union_of_fields() {
        let records = vec![
            Record::from_pairs([("id", Value::from(1.0)), ("name", Value::from("Ann, Jr"))]),
            Record::from_pairs([("id", Value::from(2.0)), ("extra", Value::from(true))]),
        ];
        let text = export_to_string(&records, ExportFormat::Csv).unwrap();
        assert_eq!(text, "id,name,extra\n1,\"Ann, Jr\",\n2,,true\n");
    }

    #[test]
    fn json_keeps_nesting_and_types() {
        let raw = json!({"when": "2024-01-05", "geo": {"lat": "1.5"}, "note": null});
        let record = normalize_record(raw.as_object().unwrap());
        let text = export_to_string(&[record], ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!([{"when": "2024-01-05", "geo": {"lat": 1.5}, "note": null}])
        );
    }

    #[test]
    fn empty_set_exports_cleanly() {
        assert_eq!(export_to_string(&[], ExportFormat::Csv).unwrap(), "");
        assert_eq!(export_to_string(&[], ExportFormat::Json).unwrap().trim(), "[]");
    }
}
