//! Plain-text table rendering for terminal output.

use std::fmt::Write as _;

use crate::{
    data::{Record, format_number},
    profile::{FieldProfile, field_paths},
};

const COLUMN_GAP: &str = "  ";

pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths = headers
        .iter()
        .map(|header| header.chars().count().max(3))
        .collect::<Vec<_>>();
    let rows = rows
        .iter()
        .map(|row| row.iter().map(|cell| flatten(cell)).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", join_padded(headers.iter().map(String::as_str), &widths));
    let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", join_padded(rule.iter().map(String::as_str), &widths));
    for row in &rows {
        let _ = writeln!(output, "{}", join_padded(row.iter().map(String::as_str), &widths));
    }
    output
}

/// Tabulates records over the union of their leaf fields.
pub fn render_records(records: &[Record]) -> String {
    let headers = field_paths(records);
    let rows = records
        .iter()
        .map(|record| {
            headers
                .iter()
                .map(|path| record.value(path).as_display())
                .collect()
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

pub fn render_profiles(profiles: &[FieldProfile]) -> String {
    let headers = ["field", "type", "nulls", "unique", "sum", "avg", "min", "max", "trend"]
        .map(String::from)
        .to_vec();
    let rows = profiles
        .iter()
        .map(|p| {
            let mut row = vec![
                p.field.clone(),
                p.inferred_type.to_string(),
                p.null_count.to_string(),
                p.unique_count.to_string(),
            ];
            match &p.numeric {
                Some(stats) => row.extend([
                    format_number(stats.sum),
                    format_number(stats.average),
                    format_number(stats.minimum),
                    format_number(stats.maximum),
                    stats.trend_label(),
                ]),
                None => row.extend(std::iter::repeat_n(String::new(), 5)),
            }
            row
        })
        .collect::<Vec<_>>();
    render_table(&headers, &rows)
}

fn join_padded<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize]) -> String {
    let mut line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join(COLUMN_GAP);
    line.truncate(line.trim_end().len());
    line
}

fn flatten(cell: &str) -> String {
    cell.replace(['\n', '\r', '\t'], " ")
}
