//! Delimiter-separated text sources.
//!
//! Text comes from an inline `text` field, a local `path`, or a remote `url`.
//! Rows whose cell count differs from the header row are dropped; the number
//! dropped is logged at debug level.

use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde_json::{Map, Value as JsonValue};

use super::{SourceAdapter, header_names};
use crate::{
    data::RawRecord,
    descriptor::{SourceDescriptor, SourceKind},
    error::{FetchError, FetchResult},
};

pub const DEFAULT_DELIMITER: u8 = b',';

pub struct DelimitedTextAdapter {
    client: reqwest::Client,
    timeout: Duration,
}

/// Result of splitting a text payload into records.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRecord>,
    pub dropped: usize,
}

impl DelimitedTextAdapter {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn read_text(&self, descriptor: &SourceDescriptor) -> FetchResult<String> {
        if let Some(text) = descriptor
            .connection_config
            .get("text")
            .and_then(JsonValue::as_str)
        {
            return Ok(text.to_string());
        }
        let encoding = resolve_encoding(descriptor.config_str(&["encoding"]))?;
        if let Some(path) = descriptor.config_str(&["path"]) {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|err| FetchError::network(format!("reading {path}: {err}")))?;
            return decode_bytes(&bytes, encoding);
        }
        let url = descriptor.require_str(&["url", "csvUrl"])?;
        let timeout = descriptor.timeout_override().unwrap_or(self.timeout);
        let download = async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::network(format!("HTTP {status} fetching {url}")));
            }
            Ok::<_, FetchError>(response.bytes().await?)
        };
        let bytes = tokio::time::timeout(timeout, download)
            .await
            .map_err(|_| FetchError::Timeout(timeout.as_millis() as u64))??;
        decode_bytes(&bytes, encoding)
    }
}

#[async_trait]
impl SourceAdapter for DelimitedTextAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::DelimitedText
    }

    async fn fetch(&self, descriptor: &SourceDescriptor) -> FetchResult<Vec<RawRecord>> {
        let delimiter = match descriptor.config_str(&["delimiter"]) {
            Some(raw) => parse_delimiter(raw).map_err(|message| {
                FetchError::config(format!("source '{}': {message}", descriptor.id))
            })?,
            None => DEFAULT_DELIMITER,
        };
        let has_headers = descriptor.config_bool("has_headers").unwrap_or(true);
        let text = self.read_text(descriptor).await?;
        let table = parse_delimited(&text, delimiter, has_headers)?;
        if table.dropped > 0 {
            debug!(
                "Source '{}': dropped {} row(s) whose width differs from {} header(s)",
                descriptor.id,
                table.dropped,
                table.headers.len()
            );
        }
        Ok(table.rows)
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn resolve_encoding(label: Option<&str>) -> FetchResult<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| FetchError::config(format!("Unknown encoding '{value}'"))),
        None => Ok(UTF_8),
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> FetchResult<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(FetchError::parse(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

fn strip_quotes(cell: &str) -> String {
    let trimmed = cell.trim();
    ['"', '\'']
        .into_iter()
        .find_map(|quote| {
            trimmed
                .strip_prefix(quote)
                .and_then(|inner| inner.strip_suffix(quote))
        })
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Splits `text` into records. Cells stay raw strings; coercion happens later.
pub fn parse_delimited(text: &str, delimiter: u8, has_headers: bool) -> FetchResult<ParsedTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut lines = Vec::new();
    for record in reader.records() {
        let cells = record?.iter().map(strip_quotes).collect::<Vec<_>>();
        if cells.iter().all(String::is_empty) {
            continue;
        }
        lines.push(cells);
    }

    let mut lines = lines.into_iter();
    let Some(first) = lines.next() else {
        return Ok(ParsedTable {
            headers: Vec::new(),
            rows: Vec::new(),
            dropped: 0,
        });
    };
    let (headers, pending) = if has_headers {
        (header_names(first.into_iter().map(Some)), None)
    } else {
        let names = (1..=first.len()).map(|idx| format!("column_{idx}")).collect();
        (names, Some(first))
    };

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for cells in pending.into_iter().chain(lines) {
        if cells.len() != headers.len() {
            dropped += 1;
            continue;
        }
        let row = headers
            .iter()
            .cloned()
            .zip(cells.into_iter().map(JsonValue::String))
            .collect::<Map<String, JsonValue>>();
        rows.push(row);
    }
    Ok(ParsedTable {
        headers,
        rows,
        dropped,
    })
}
