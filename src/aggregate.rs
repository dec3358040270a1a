//! Group-by aggregation and explicit sorting over normalized records.

use std::{collections::HashMap, fmt};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::data::{ComparableValue, Record, Value};

/// Group key used when the group-by field is null or missing.
pub const MISSING_GROUP: &str = "N/A";

/// Field that carries the group size in every aggregation output record.
pub const COUNT_FIELD: &str = "count";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregateFunction {
    Sum,
    Average,
    Count,
    Min,
    Max,
    First,
    Last,
    /// Unrecognized name; evaluates to the group size.
    Unknown(String),
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "sum" => AggregateFunction::Sum,
            "average" | "avg" | "mean" => AggregateFunction::Average,
            "count" => AggregateFunction::Count,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            "first" => AggregateFunction::First,
            "last" => AggregateFunction::Last,
            _ => AggregateFunction::Unknown(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Average => "average",
            AggregateFunction::Count => "count",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::First => "first",
            AggregateFunction::Last => "last",
            AggregateFunction::Unknown(name) => name,
        }
    }

    fn evaluate(&self, field: &str, members: &[&Record]) -> Value {
        let numbers = || {
            members
                .iter()
                .filter_map(|record| record.value(field).as_number())
        };
        match self {
            AggregateFunction::Sum => Value::Number(numbers().sum()),
            AggregateFunction::Average => {
                let (total, count) = numbers().fold((0.0, 0usize), |(t, c), n| (t + n, c + 1));
                if count == 0 {
                    Value::Number(0.0)
                } else {
                    Value::Number(total / count as f64)
                }
            }
            AggregateFunction::Min => Value::Number(numbers().reduce(f64::min).unwrap_or(0.0)),
            AggregateFunction::Max => Value::Number(numbers().reduce(f64::max).unwrap_or(0.0)),
            AggregateFunction::First => members
                .first()
                .map_or(Value::Null, |record| record.value(field).clone()),
            AggregateFunction::Last => members
                .last()
                .map_or(Value::Null, |record| record.value(field).clone()),
            AggregateFunction::Count | AggregateFunction::Unknown(_) => {
                Value::Number(members.len() as f64)
            }
        }
    }
}

impl From<&str> for AggregateFunction {
    fn from(value: &str) -> Self {
        AggregateFunction::from_name(value)
    }
}

impl From<String> for AggregateFunction {
    fn from(value: String) -> Self {
        AggregateFunction::from_name(&value)
    }
}

impl From<AggregateFunction> for String {
    fn from(value: AggregateFunction) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAggregateSpec")]
pub struct AggregateSpec {
    pub field: String,
    pub function: AggregateFunction,
    pub alias: String,
}

#[derive(Deserialize)]
struct RawAggregateSpec {
    field: String,
    function: AggregateFunction,
    #[serde(default)]
    alias: Option<String>,
}

impl From<RawAggregateSpec> for AggregateSpec {
    fn from(raw: RawAggregateSpec) -> Self {
        let spec = AggregateSpec::new(raw.field, raw.function);
        match raw.alias {
            Some(alias) if !alias.trim().is_empty() => spec.with_alias(alias.trim()),
            _ => spec,
        }
    }
}

impl AggregateSpec {
    /// Spec aliased `<field>_<function>`.
    pub fn new(field: impl Into<String>, function: impl Into<AggregateFunction>) -> Self {
        let field = field.into();
        let function = function.into();
        let alias = format!("{field}_{}", function.as_str());
        Self {
            field,
            function,
            alias,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub group_by: String,
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

impl AggregationSpec {
    pub fn new(group_by: impl Into<String>, aggregates: Vec<AggregateSpec>) -> Self {
        Self {
            group_by: group_by.into(),
            aggregates,
        }
    }
}

/// Partitions `records` by the textual form of the group-by field and emits
/// one record per group, in order of each key's first appearance.
///
/// Output records hold the group key (as text) under the group-by name, each
/// aggregate under its alias, then the group size under `count`.
pub fn aggregate(records: &[Record], spec: &AggregationSpec) -> Vec<Record> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&Record>)> = Vec::new();
    for record in records {
        let key = group_key(record.value(&spec.group_by));
        match positions.get(&key) {
            Some(&idx) => groups[idx].1.push(record),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push((key, vec![record]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut output = Record::new();
            output.insert(spec.group_by.clone(), Value::Text(key));
            for aggregate in &spec.aggregates {
                output.insert(
                    aggregate.alias.clone(),
                    aggregate.function.evaluate(&aggregate.field, &members),
                );
            }
            output.insert(COUNT_FIELD, Value::Number(members.len() as f64));
            output
        })
        .collect()
}

fn group_key(value: &Value) -> String {
    if value.is_empty() {
        MISSING_GROUP.to_string()
    } else {
        value.as_display()
    }
}

/// Stable sort by one field using the cross-tag order of [`ComparableValue`].
pub fn sort_records(records: &[Record], field: &str, descending: bool) -> Vec<Record> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| {
        let ordering = ComparableValue(a.value(field)).cmp(&ComparableValue(b.value(field)));
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    sorted
}

/// Parses `field:function[:alias]` expressions from the command line.
pub fn parse_aggregates(expressions: &[String]) -> Result<Vec<AggregateSpec>> {
    expressions
        .iter()
        .map(|expression| {
            let mut parts = expression.splitn(3, ':').map(str::trim);
            let field = parts.next().unwrap_or_default();
            let function = parts.next().unwrap_or_default();
            if field.is_empty() || function.is_empty() {
                return Err(anyhow!(
                    "Aggregate '{expression}' must look like field:function[:alias]"
                ));
            }
            let spec = AggregateSpec::new(field, function);
            Ok(match parts.next() {
                Some(alias) if !alias.is_empty() => spec.with_alias(alias),
                _ => spec,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Vec<Record> {
        vec![
            Record::from_pairs([("cat", Value::from("A")), ("v", Value::from(10.0))]),
            Record::from_pairs([("cat", Value::from("B")), ("v", Value::from(5.0))]),
            Record::from_pairs([("cat", Value::from("A")), ("v", Value::from(20.0))]),
        ]
    }

    #[test]
    fn sums_per_group_in_first_appearance_order() {
        let spec = AggregationSpec::new("cat", vec![AggregateSpec::new("v", "sum")]);
        let output = aggregate(&sales(), &spec);
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].value("cat"), &Value::from("A"));
        assert_eq!(output[0].value("v_sum"), &Value::Number(30.0));
        assert_eq!(output[0].value("count"), &Value::Number(2.0));
        assert_eq!(output[1].value("cat"), &Value::from("B"));
        assert_eq!(output[1].value("v_sum"), &Value::Number(5.0));
        assert_eq!(
            output[0].field_names().collect::<Vec<_>>(),
            vec!["cat", "v_sum", "count"]
        );
    }

    #[test]
    fn every_function_over_one_group() {
        let spec = AggregationSpec::new(
            "cat",
            vec![
                AggregateSpec::new("v", "avg").with_alias("mean"),
                AggregateSpec::new("v", "min"),
                AggregateSpec::new("v", "max"),
                AggregateSpec::new("v", "first"),
                AggregateSpec::new("v", "last"),
                AggregateSpec::new("v", "count"),
                AggregateSpec::new("v", "median"),
            ],
        );
        let a_only = sales()
            .into_iter()
            .filter(|r| r.value("cat") == &Value::from("A"))
            .collect::<Vec<_>>();
        let output = aggregate(&a_only, &spec);
        let row = &output[0];
        assert_eq!(row.value("mean"), &Value::Number(15.0));
        assert_eq!(row.value("v_min"), &Value::Number(10.0));
        assert_eq!(row.value("v_max"), &Value::Number(20.0));
        assert_eq!(row.value("v_first"), &Value::Number(10.0));
        assert_eq!(row.value("v_last"), &Value::Number(20.0));
        assert_eq!(row.value("v_count"), &Value::Number(2.0));
        assert_eq!(row.value("v_median"), &Value::Number(2.0));
    }

    #[test]
    fn non_numeric_values_degrade_gracefully() {
        let records = vec![
            Record::from_pairs([("cat", Value::Null), ("v", Value::from("n/a"))]),
            Record::from_pairs([("v", Value::from(true))]),
        ];
        let spec = AggregationSpec::new(
            "cat",
            vec![
                AggregateSpec::new("v", "sum"),
                AggregateSpec::new("v", "average"),
                AggregateSpec::new("v", "min"),
                AggregateSpec::new("v", "max"),
            ],
        );
        let output = aggregate(&records, &spec);
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].value("cat"), &Value::from(MISSING_GROUP));
        assert_eq!(output[0].value("v_sum"), &Value::Number(0.0));
        assert_eq!(output[0].value("v_average"), &Value::Number(0.0));
        assert_eq!(output[0].value("v_min"), &Value::Number(0.0));
        assert_eq!(output[0].value("v_max"), &Value::Number(0.0));
        assert_eq!(output[0].value("count"), &Value::Number(2.0));
    }

    #[test]
    fn empty_input_gives_no_groups() {
        let spec = AggregationSpec::new("cat", vec![AggregateSpec::new("v", "sum")]);
        assert!(aggregate(&[], &spec).is_empty());
    }

    #[test]
    fn sorts_descending_with_nulls_last() {
        let mut records = sales();
        records.push(Record::from_pairs([("cat", "C")]));
        let sorted = sort_records(&records, "v", true);
        let values = sorted.iter().map(|r| r.value("v").clone()).collect::<Vec<_>>();
        assert_eq!(
            values,
            vec![
                Value::Number(20.0),
                Value::Number(10.0),
                Value::Number(5.0),
                Value::Null
            ]
        );
    }

    #[test]
    fn parses_cli_aggregates() {
        let specs = parse_aggregates(&["amount:sum".to_string(), "amount:avg:mean".to_string()])
            .unwrap();
        assert_eq!(specs[0].alias, "amount_sum");
        assert_eq!(specs[1].function, AggregateFunction::Average);
        assert_eq!(specs[1].alias, "mean");
        assert!(parse_aggregates(&["amount".to_string()]).is_err());
    }
}
