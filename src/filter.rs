use std::fmt;

use anyhow::{Result, anyhow};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::data::{Record, Value, coerce, coerce_text};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Contains,
    StartsWith,
    EndsWith,
    Empty,
    NotEmpty,
    In,
    /// Unrecognized name; matches every record.
    Unknown(String),
}

impl FilterOperator {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "equals" | "eq" | "=" | "==" => FilterOperator::Equals,
            "not_equals" | "ne" | "!=" | "<>" => FilterOperator::NotEquals,
            "greater" | "gt" | ">" => FilterOperator::Greater,
            "greater_equal" | "greater_equals" | "ge" | ">=" => FilterOperator::GreaterEqual,
            "less" | "lt" | "<" => FilterOperator::Less,
            "less_equal" | "less_equals" | "le" | "<=" => FilterOperator::LessEqual,
            "contains" => FilterOperator::Contains,
            "starts_with" | "startswith" => FilterOperator::StartsWith,
            "ends_with" | "endswith" => FilterOperator::EndsWith,
            "empty" | "is_empty" => FilterOperator::Empty,
            "not_empty" | "is_not_empty" => FilterOperator::NotEmpty,
            "in" => FilterOperator::In,
            _ => FilterOperator::Unknown(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "not_equals",
            FilterOperator::Greater => "greater",
            FilterOperator::GreaterEqual => "greater_equal",
            FilterOperator::Less => "less",
            FilterOperator::LessEqual => "less_equal",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::Empty => "empty",
            FilterOperator::NotEmpty => "not_empty",
            FilterOperator::In => "in",
            FilterOperator::Unknown(name) => name,
        }
    }

    /// Operators that compare against the comparand's text as written.
    fn is_textual(&self) -> bool {
        matches!(
            self,
            FilterOperator::Contains
                | FilterOperator::StartsWith
                | FilterOperator::EndsWith
                | FilterOperator::In
        )
    }
}

impl From<&str> for FilterOperator {
    fn from(value: &str) -> Self {
        FilterOperator::from_name(value)
    }
}

impl From<String> for FilterOperator {
    fn from(value: String) -> Self {
        FilterOperator::from_name(&value)
    }
}

impl From<FilterOperator> for String {
    fn from(value: FilterOperator) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawFilterSpec")]
pub struct FilterSpec {
    pub field: String,
    pub operator: FilterOperator,
    pub comparand: Value,
}

#[derive(Deserialize)]
struct RawFilterSpec {
    field: String,
    operator: FilterOperator,
    #[serde(default)]
    value: JsonValue,
}

impl From<RawFilterSpec> for FilterSpec {
    fn from(raw: RawFilterSpec) -> Self {
        let RawFilterSpec {
            field,
            operator,
            value,
        } = raw;
        match value {
            JsonValue::String(text) => FilterSpec::from_text(field, operator, &text),
            JsonValue::Array(items) if operator == FilterOperator::In => {
                let members = items
                    .iter()
                    .map(|item| match item {
                        JsonValue::String(text) => text.trim().to_string(),
                        other => coerce(other).as_display(),
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                FilterSpec::new(field, operator, Value::Text(members))
            }
            other => FilterSpec::new(field, operator, coerce(&other)),
        }
    }
}

impl FilterSpec {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<FilterOperator>,
        comparand: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            comparand: comparand.into(),
        }
    }

    /// Builds a spec from a textual comparand. Substring and membership
    /// operators keep the text verbatim; the rest coerce it like record cells.
    pub fn from_text(
        field: impl Into<String>,
        operator: impl Into<FilterOperator>,
        raw: &str,
    ) -> Self {
        let operator = operator.into();
        let comparand = if operator.is_textual() {
            Value::Text(raw.trim().to_string())
        } else {
            coerce_text(raw)
        };
        Self {
            field: field.into(),
            operator,
            comparand,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let value = record.value(&self.field);
        let comparand = &self.comparand;
        match &self.operator {
            FilterOperator::Equals => loose_equals(value, comparand),
            FilterOperator::NotEquals => !loose_equals(value, comparand),
            FilterOperator::Greater => compare(value, comparand, |a, b| a > b),
            FilterOperator::GreaterEqual => compare(value, comparand, |a, b| a >= b),
            FilterOperator::Less => compare(value, comparand, |a, b| a < b),
            FilterOperator::LessEqual => compare(value, comparand, |a, b| a <= b),
            FilterOperator::Contains => folded(value).contains(&folded(comparand)),
            FilterOperator::StartsWith => folded(value).starts_with(&folded(comparand)),
            FilterOperator::EndsWith => folded(value).ends_with(&folded(comparand)),
            FilterOperator::Empty => value.is_empty(),
            FilterOperator::NotEmpty => !value.is_empty(),
            FilterOperator::In => {
                let candidate = value.as_display();
                comparand
                    .as_display()
                    .split(',')
                    .any(|member| member.trim() == candidate)
            }
            FilterOperator::Unknown(_) => true,
        }
    }
}

/// Records satisfying every spec, in input order. An empty spec list keeps all.
pub fn filter(records: &[Record], specs: &[FilterSpec]) -> Vec<Record> {
    records
        .iter()
        .filter(|record| matches_all(record, specs))
        .cloned()
        .collect()
}

pub fn matches_all(record: &Record, specs: &[FilterSpec]) -> bool {
    specs.iter().all(|spec| spec.matches(record))
}

/// Numbers compare numerically when both sides have a numeric view; otherwise
/// the textual forms must match exactly. Null only equals Null or empty text.
pub fn loose_equals(left: &Value, right: &Value) -> bool {
    if left.is_empty() || right.is_empty() {
        return left.is_empty() && right.is_empty();
    }
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a == b,
        _ => left.as_display() == right.as_display(),
    }
}

fn compare(left: &Value, right: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    if let (Value::Date(a), Value::Date(b)) = (left, right) {
        return op(a.num_days_from_ce() as f64, b.num_days_from_ce() as f64);
    }
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn folded(value: &Value) -> String {
    value.as_display().to_lowercase()
}

pub fn parse_filters(filters: &[String]) -> Result<Vec<FilterSpec>> {
    filters.iter().map(|f| parse_filter(f)).collect()
}

/// Parses `field OP value` where OP is symbolic (`>=`, `!=`, ...) or a word
/// operator surrounded by spaces (`contains`, `starts_with`, `in`, ...).
/// `field empty` and `field not_empty` take no value.
fn parse_filter(filter: &str) -> Result<FilterSpec> {
    let trimmed = filter.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Empty filter expression"));
    }

    let lowered = trimmed.to_ascii_lowercase();
    for (suffix, op) in [
        (" not_empty", FilterOperator::NotEmpty),
        (" empty", FilterOperator::Empty),
    ] {
        if lowered.ends_with(suffix) {
            let field = trimmed[..trimmed.len() - suffix.len()].trim();
            if !field.is_empty() && !field.contains(char::is_whitespace) {
                return Ok(FilterSpec::new(field, op, Value::Null));
            }
        }
    }

    for needle in [
        " contains ",
        " starts_with ",
        " startswith ",
        " ends_with ",
        " endswith ",
        " in ",
    ] {
        if let Some(idx) = lowered.find(needle) {
            let (left, right_with_space) = trimmed.split_at(idx);
            let field = left.trim();
            if field.is_empty()
                || field.contains(char::is_whitespace)
                || field.contains(['=', '<', '>', '!'])
            {
                continue;
            }
            let right = right_with_space[needle.len()..].trim();
            return Ok(FilterSpec::from_text(
                field,
                FilterOperator::from_name(needle),
                unquote(right),
            ));
        }
    }

    for needle in ["!=", ">=", "<=", "=", ">", "<"] {
        if let Some(idx) = trimmed.find(needle) {
            let left = trimmed[..idx].trim();
            let right = trimmed[idx + needle.len()..].trim();
            if left.is_empty() {
                break;
            }
            return Ok(FilterSpec::from_text(
                left,
                FilterOperator::from_name(needle),
                unquote(right),
            ));
        }
    }

    Err(anyhow!("Failed to parse filter expression '{trimmed}'"))
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
        {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: &[f64]) -> Vec<Record> {
        values
            .iter()
            .map(|v| Record::from_pairs([("a", *v)]))
            .collect()
    }

    #[test]
    fn greater_keeps_matching_rows_in_order() {
        let kept = filter(&rows(&[1.0, 5.0, 10.0]), &[FilterSpec::new("a", ">", 3.0)]);
        let values = kept.iter().map(|r| r.value("a").clone()).collect::<Vec<_>>();
        assert_eq!(values, vec![Value::Number(5.0), Value::Number(10.0)]);
    }

    #[test]
    fn empty_spec_list_is_identity() {
        let input = rows(&[1.0, 2.0]);
        assert_eq!(filter(&input, &[]), input);
    }

    #[test]
    fn equality_is_loose_across_tags() {
        let record = Record::from_pairs([("n", Value::Text("10".into()))]);
        assert!(FilterSpec::new("n", "equals", 10.0).matches(&record));
        assert!(!FilterSpec::new("n", "equals", "ten").matches(&record));
        assert!(FilterSpec::new("missing", "=", Value::Null).matches(&record));
        assert!(FilterSpec::new("missing", "equals", "").matches(&record));
        assert!(!FilterSpec::new("n", "equals", Value::Null).matches(&record));
        assert!(FilterSpec::new("n", "not_equals", Value::Null).matches(&record));

        let flag = Record::from_pairs([("active", true)]);
        assert!(FilterSpec::from_text("active", "=", "TRUE").matches(&flag));
        assert!(!FilterSpec::new("active", "equals", 1.0).matches(&flag));
    }

    #[test]
    fn ordering_needs_numbers_on_both_sides() {
        let record = Record::from_pairs([("name", "Ann")]);
        assert!(!FilterSpec::new("name", "greater", 1.0).matches(&record));
        assert!(!FilterSpec::new("name", "less", 1.0).matches(&record));
    }

    #[test]
    fn substring_operators_ignore_case() {
        let record = Record::from_pairs([("name", "Alice Smith")]);
        assert!(FilterSpec::new("name", "contains", "SMI").matches(&record));
        assert!(FilterSpec::new("name", "starts_with", "ali").matches(&record));
        assert!(FilterSpec::new("name", "ends_with", "TH").matches(&record));
        assert!(!FilterSpec::new("name", "ends_with", "alice").matches(&record));
    }

    #[test]
    fn in_matches_listed_members() {
        let record = Record::from_pairs([("region", "north")]);
        assert!(FilterSpec::from_text("region", "in", "south, north").matches(&record));
        assert!(!FilterSpec::from_text("region", "in", "east,west").matches(&record));
    }

    #[test]
    fn unknown_operator_matches_everything() {
        let spec = FilterSpec::new("a", "between", 3.0);
        assert_eq!(spec.operator, FilterOperator::Unknown("between".into()));
        assert_eq!(filter(&rows(&[1.0, 2.0]), &[spec]).len(), 2);
    }

    #[test]
    fn deserializes_from_json() {
        let spec: FilterSpec =
            serde_json::from_value(json!({"field": "amount", "operator": ">=", "value": "100"}))
                .unwrap();
        assert_eq!(spec.operator, FilterOperator::GreaterEqual);
        assert_eq!(spec.comparand, Value::Number(100.0));
        let spec: FilterSpec =
            serde_json::from_value(json!({"field": "code", "operator": "contains", "value": "007"}))
                .unwrap();
        assert_eq!(spec.comparand, Value::Text("007".into()));
    }

    #[test]
    fn in_accepts_a_json_member_list() {
        let spec: FilterSpec = serde_json::from_value(
            json!({"field": "region", "operator": "in", "value": ["north", "south"]}),
        )
        .unwrap();
        assert_eq!(spec.comparand, Value::Text("north,south".into()));
        let north = Record::from_pairs([("region", "north")]);
        let east = Record::from_pairs([("region", "east")]);
        assert!(spec.matches(&north));
        assert!(!spec.matches(&east));

        let codes: FilterSpec =
            serde_json::from_value(json!({"field": "code", "operator": "in", "value": [7, 12]}))
                .unwrap();
        assert!(codes.matches(&Record::from_pairs([("code", 12.0)])));
    }

    #[test]
    fn parses_cli_expressions() {
        let specs = parse_filters(&[
            "amount>=100".to_string(),
            "name contains 'ali'".to_string(),
            "status != closed".to_string(),
            "notes empty".to_string(),
            "region in north,south".to_string(),
        ])
        .unwrap();
        assert_eq!(specs[0], FilterSpec::new("amount", ">=", 100.0));
        assert_eq!(specs[1], FilterSpec::new("name", "contains", "ali"));
        assert_eq!(specs[2], FilterSpec::new("status", "not_equals", "closed"));
        assert_eq!(specs[3].operator, FilterOperator::Empty);
        assert_eq!(specs[4].comparand, Value::Text("north,south".into()));
        assert!(parse_filters(&["just words".to_string()]).is_err());
        assert!(parse_filters(&[">5".to_string()]).is_err());
        let phrase = parse_filters(&["title = stay in touch".to_string()]).unwrap();
        assert_eq!(phrase[0], FilterSpec::new("title", "equals", "stay in touch"));
    }
}
