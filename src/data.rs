//! Typed record model and scalar coercion.
//!
//! Every adapter hands back loosely typed JSON objects. This module turns them
//! into [`Record`]s whose leaves are [`Value`]s. Coercion of a single scalar
//! follows a fixed rule order (null, boolean, number, date, text) so the same
//! input always lands on the same tag:
//!
//! - `""`, whitespace and JSON `null` become [`Value::Null`]
//! - `true`/`false` literals (any case) become [`Value::Bool`]
//! - finite numbers, with thousands separators and currency symbols removed,
//!   become [`Value::Number`]
//! - `YYYY-MM-DD`, `DD/MM/YYYY` and `D.M.YYYY` strings naming a real calendar
//!   day become [`Value::Date`]
//! - anything else is trimmed text

use std::{cmp::Ordering, fmt, sync::LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

/// Raw record as delivered by an adapter, before coercion.
pub type RawRecord = Map<String, JsonValue>;

const CURRENCY_TOKENS: &[&str] = &["CZK", "USD", "EUR", "GBP", "Kč", "$", "€", "£", "¥"];

static DATE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"^\d{4}-\d{2}-\d{2}$", "%Y-%m-%d"),
        (r"^\d{2}/\d{2}/\d{4}$", "%d/%m/%Y"),
        (r"^\d{1,2}\.\d{1,2}\.\d{4}$", "%d.%m.%Y"),
    ]
    .into_iter()
    .filter_map(|(pattern, format)| Regex::new(pattern).ok().map(|re| (re, format)))
    .collect()
});

static GROUPED_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d{1,3}([, \u{a0}]\d{3})+(\.\d+)?$").ok());

static NULL_VALUE: Value = Value::Null;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDate),
    Null,
}

impl Value {
    /// Textual representation used for grouping, uniqueness and substring tests.
    pub fn as_display(&self) -> String {
        match self {
            Value::Number(n) => format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Null => String::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for `Null` and for text that is empty after trimming.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value. Text is parsed with the same rules as
    /// coercion; booleans and dates have no numeric view.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            Value::Null => JsonValue::Null,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Date(_) => 3,
            Value::Text(_) => 4,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_display())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

/// Total order over values of any tag, used for explicit sorting.
///
/// Tags order as null, boolean, number, date, text; values of the same tag use
/// their natural order (`f64::total_cmp` for numbers).
#[derive(Debug, Clone, PartialEq)]
pub struct ComparableValue<'a>(pub &'a Value);

impl Eq for ComparableValue<'_> {}

impl Ord for ComparableValue<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0, other.0) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (left, right) => left.rank().cmp(&right.rank()),
        }
    }
}

impl PartialOrd for ComparableValue<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Value(Value),
    Nested(Record),
}

/// Ordered mapping from field name to value. Nested JSON objects stay nested
/// and are reached with dotted paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entries: Vec<(String, Entry)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Record::new();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        record
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces a top-level field, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.put(name.into(), Entry::Value(value.into()));
    }

    pub fn insert_nested(&mut self, name: impl Into<String>, record: Record) {
        self.put(name.into(), Entry::Nested(record));
    }

    fn put(&mut self, name: String, entry: Entry) {
        if let Some(slot) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            slot.1 = entry;
        } else {
            self.entries.push((name, entry));
        }
    }

    pub fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, entry)| entry)
    }

    /// Looks up a leaf value. A literal top-level key wins over a dotted
    /// traversal so headers such as `"unit.price"` stay addressable.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(Entry::Value(value)) = self.entry(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self;
        let mut segment = segments.next()?;
        loop {
            match (current.entry(segment)?, segments.next()) {
                (Entry::Value(value), None) => return Some(value),
                (Entry::Nested(child), Some(next)) => {
                    current = child;
                    segment = next;
                }
                _ => return None,
            }
        }
    }

    /// Like [`Record::get`] but reports absent fields as `Null`.
    pub fn value(&self, path: &str) -> &Value {
        self.get(path).unwrap_or(&NULL_VALUE)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Dotted paths of every leaf value, depth first in field order.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_paths("", &mut paths);
        paths
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, entry) in &self.entries {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match entry {
                Entry::Value(_) => out.push(path),
                Entry::Nested(child) => child.collect_paths(&path, out),
            }
        }
    }

    pub fn to_json(&self) -> JsonValue {
        let map = self
            .entries
            .iter()
            .map(|(key, entry)| {
                let value = match entry {
                    Entry::Value(value) => value.to_json(),
                    Entry::Nested(child) => child.to_json(),
                };
                (key.clone(), value)
            })
            .collect::<Map<_, _>>();
        JsonValue::Object(map)
    }
}

impl serde::Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Parses a numeric string after removing currency symbols and thousands
/// separators. Returns `None` for anything that is not a finite number.
pub fn parse_number(raw: &str) -> Option<f64> {
    let mut candidate = raw.trim().to_string();
    for token in CURRENCY_TOKENS {
        if let Some(stripped) = candidate.strip_prefix(token) {
            candidate = stripped.trim_start().to_string();
        }
        if let Some(stripped) = candidate.strip_suffix(token) {
            candidate = stripped.trim_end().to_string();
        }
    }
    if candidate.is_empty() {
        return None;
    }
    if GROUPED_NUMBER
        .as_ref()
        .is_some_and(|re| re.is_match(&candidate))
    {
        candidate.retain(|c| !matches!(c, ',' | ' ' | '\u{a0}'));
    }
    if !candidate
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
    {
        return None;
    }
    candidate.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Accepts `YYYY-MM-DD`, `DD/MM/YYYY` and `D.M.YYYY`, rejecting impossible days.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    DATE_PATTERNS
        .iter()
        .filter(|(pattern, _)| pattern.is_match(trimmed))
        .find_map(|(_, format)| NaiveDate::parse_from_str(trimmed, format).ok())
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        Some(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Coerces a textual scalar.
pub fn coerce_text(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Some(flag) = parse_bool(trimmed) {
        return Value::Bool(flag);
    }
    if let Some(number) = parse_number(trimmed) {
        return Value::Number(number);
    }
    if let Some(date) = parse_date(trimmed) {
        return Value::Date(date);
    }
    Value::Text(trimmed.to_string())
}

/// Coerces a JSON scalar. Arrays are kept as their JSON text; objects should go
/// through [`normalize_record`] instead and are rendered as text here.
pub fn coerce(raw: &JsonValue) -> Value {
    match raw {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(flag) => Value::Bool(*flag),
        JsonValue::Number(number) => number
            .as_f64()
            .filter(|n| n.is_finite())
            .map(Value::Number)
            .unwrap_or(Value::Null),
        JsonValue::String(text) => coerce_text(text),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Text(raw.to_string()),
    }
}

/// Builds a typed record from a raw JSON object, recursing into nested objects.
pub fn normalize_record(raw: &RawRecord) -> Record {
    let mut record = Record::new();
    for (key, value) in raw {
        match value {
            JsonValue::Object(child) => record.insert_nested(key.clone(), normalize_record(child)),
            other => record.insert(key.clone(), coerce(other)),
        }
    }
    record
}

pub fn normalize_records(raw: &[RawRecord]) -> Vec<Record> {
    raw.iter().map(normalize_record).collect()
}
