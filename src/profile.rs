//! Per-field type inference and summary counts over a record set.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    fmt,
};

use itertools::Itertools;
use serde::Serialize;

use crate::data::{Record, Value};

/// Number of non-null values sampled per field for type inference.
pub const SAMPLE_SIZE: usize = 10;

/// Share of the sample (in percent) a single tag needs to claim the field.
pub const MAJORITY_THRESHOLD_PERCENT: usize = 70;

/// Number of trailing values the trend compares.
pub const TREND_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Number,
    Date,
    Boolean,
    Text,
    Unknown,
}

impl InferredType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferredType::Number => "number",
            InferredType::Date => "date",
            InferredType::Boolean => "boolean",
            InferredType::Text => "text",
            InferredType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InferredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldProfile {
    pub field: String,
    pub inferred_type: InferredType,
    pub null_count: usize,
    pub unique_count: usize,
    /// Present for fields inferred as numbers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<NumericSummary>,
}

/// Statistics over every numeric value of a field, in record order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub count: usize,
    pub sum: f64,
    pub average: f64,
    pub minimum: f64,
    pub maximum: f64,
    /// Percent change from the first to the last of the trailing
    /// [`TREND_WINDOW`] values.
    pub trend_percent: f64,
}

impl NumericSummary {
    /// Trend as a signed percentage with one decimal, e.g. `+12.5%`.
    pub fn trend_label(&self) -> String {
        if self.trend_percent > 0.0 {
            format!("+{:.1}%", self.trend_percent)
        } else {
            format!("{:.1}%", self.trend_percent)
        }
    }
}

#[derive(Debug, Default)]
struct NumericAccumulator {
    count: usize,
    sum: f64,
    minimum: f64,
    maximum: f64,
    recent: VecDeque<f64>,
}

impl NumericAccumulator {
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.minimum = value;
            self.maximum = value;
        } else {
            self.minimum = self.minimum.min(value);
            self.maximum = self.maximum.max(value);
        }
        self.count += 1;
        self.sum += value;
        if self.recent.len() == TREND_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
    }

    fn finish(mut self) -> Option<NumericSummary> {
        if self.count == 0 {
            return None;
        }
        Some(NumericSummary {
            count: self.count,
            sum: self.sum,
            average: self.sum / self.count as f64,
            minimum: self.minimum,
            maximum: self.maximum,
            trend_percent: trend_percent(self.recent.make_contiguous()),
        })
    }
}

/// Percent change between the first and last value. A zero start counts as
/// +100 % when the series ends higher and 0 % otherwise.
pub fn trend_percent(values: &[f64]) -> f64 {
    let (Some(first), Some(last)) = (values.first(), values.last()) else {
        return 0.0;
    };
    if values.len() < 2 {
        0.0
    } else if *first == 0.0 {
        if *last > 0.0 { 100.0 } else { 0.0 }
    } else {
        (last - first) / first * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataSummary {
    pub record_count: usize,
    pub fields: Vec<String>,
    pub types: BTreeMap<String, InferredType>,
}

#[derive(Debug, Default)]
struct TypeTally {
    sampled: usize,
    numbers: usize,
    dates: usize,
    booleans: usize,
}

impl TypeTally {
    fn observe(&mut self, value: &Value) {
        match value {
            Value::Number(_) => self.numbers += 1,
            Value::Date(_) => self.dates += 1,
            Value::Bool(_) => self.booleans += 1,
            Value::Text(_) => {}
            Value::Null => return,
        }
        self.sampled += 1;
    }

    fn reaches_threshold(&self, count: usize) -> bool {
        count > 0 && count * 100 >= self.sampled * MAJORITY_THRESHOLD_PERCENT
    }

    fn decide(&self) -> InferredType {
        if self.sampled == 0 {
            InferredType::Unknown
        } else if self.reaches_threshold(self.numbers) {
            InferredType::Number
        } else if self.reaches_threshold(self.dates) {
            InferredType::Date
        } else if self.reaches_threshold(self.booleans) {
            InferredType::Boolean
        } else {
            InferredType::Text
        }
    }
}

/// Classifies a sample by its dominant value tag. Nulls are ignored.
pub fn infer_type<'a>(sample: impl IntoIterator<Item = &'a Value>) -> InferredType {
    let mut tally = TypeTally::default();
    for value in sample {
        tally.observe(value);
    }
    tally.decide()
}

struct FieldAccumulator<'a> {
    tally: TypeTally,
    null_count: usize,
    distinct: HashSet<String>,
    numbers: NumericAccumulator,
    field: &'a str,
}

impl<'a> FieldAccumulator<'a> {
    fn new(field: &'a str) -> Self {
        Self {
            tally: TypeTally::default(),
            null_count: 0,
            distinct: HashSet::new(),
            numbers: NumericAccumulator::default(),
            field,
        }
    }

    fn ingest(&mut self, record: &Record) {
        let value = record.value(self.field);
        if value.is_empty() {
            self.null_count += 1;
            return;
        }
        if self.tally.sampled < SAMPLE_SIZE {
            self.tally.observe(value);
        }
        if let Some(number) = value.as_number() {
            self.numbers.push(number);
        }
        self.distinct.insert(value.as_display());
    }

    fn finish(self) -> FieldProfile {
        let inferred_type = self.tally.decide();
        let numeric = match inferred_type {
            InferredType::Number => self.numbers.finish(),
            _ => None,
        };
        FieldProfile {
            field: self.field.to_string(),
            inferred_type,
            null_count: self.null_count,
            unique_count: self.distinct.len(),
            numeric,
        }
    }
}

/// Union of leaf field paths across `records`, in first-seen order.
pub fn field_paths(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .flat_map(Record::leaf_paths)
        .unique()
        .collect()
}

/// Profiles every field that appears in any record. Absent fields and empty
/// text count as nulls.
pub fn profile(records: &[Record]) -> Vec<FieldProfile> {
    field_paths(records)
        .iter()
        .map(|field| {
            let mut accumulator = FieldAccumulator::new(field);
            for record in records {
                accumulator.ingest(record);
            }
            accumulator.finish()
        })
        .collect()
}

pub fn summarize(records: &[Record]) -> DataSummary {
    let profiles = profile(records);
    DataSummary {
        record_count: records.len(),
        fields: profiles.iter().map(|p| p.field.clone()).collect(),
        types: profiles
            .into_iter()
            .map(|p| (p.field, p.inferred_type))
            .collect(),
    }
}
