mod common;

use common::records;
use dashfeed::{
    AggregateSpec, AggregationSpec, FilterSpec, InferredType, Value, aggregate,
    data::{coerce_text, normalize_record},
    filter, profile, sort_records, summarize,
};
use proptest::prelude::*;
use serde_json::json;

#[test]
fn coercion_examples() {
    assert_eq!(coerce_text("true"), Value::Bool(true));
    assert_eq!(coerce_text("false"), Value::Bool(false));
    assert_eq!(coerce_text("123.45"), Value::Number(123.45));
    assert!(matches!(coerce_text("2024-01-05"), Value::Date(_)));
    assert_eq!(coerce_text("hello"), Value::Text("hello".into()));
    assert_eq!(coerce_text("12%"), Value::Text("12%".into()));
    assert_eq!(coerce_text("€ 1 500,00"), Value::Text("€ 1 500,00".into()));
}

#[test]
fn filter_then_aggregate_then_sort() {
    let rows = records(json!([
        {"cat": "A", "region": "north", "v": "10"},
        {"cat": "B", "region": "north", "v": "5"},
        {"cat": "A", "region": "south", "v": "20"},
        {"cat": "C", "region": "south", "v": "1"},
        {"region": "north", "v": "7"}
    ]));

    let north = filter(&rows, &[FilterSpec::from_text("region", "=", "north")]);
    assert_eq!(north.len(), 3);

    let spec = AggregationSpec::new("cat", vec![AggregateSpec::new("v", "sum")]);
    let grouped = aggregate(&rows, &spec);
    let keys = grouped
        .iter()
        .map(|r| r.value("cat").as_display())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["A", "B", "C", "N/A"]);

    let ranked = sort_records(&grouped, "v_sum", true);
    assert_eq!(ranked[0].value("cat"), &Value::from("A"));
    assert_eq!(ranked[0].value("v_sum"), &Value::Number(30.0));
    assert_eq!(ranked[0].value("count"), &Value::Number(2.0));
    assert_eq!(ranked[3].value("v_sum"), &Value::Number(1.0));
}

#[test]
fn spec_lists_deserialize_from_json() {
    let filters: Vec<FilterSpec> = serde_json::from_value(json!([
        {"field": "amount", "operator": "greater", "value": 3},
        {"field": "name", "operator": "not_empty"}
    ]))
    .unwrap();
    let aggregation: AggregationSpec = serde_json::from_value(json!({
        "group_by": "cat",
        "aggregates": [{"field": "amount", "function": "avg", "alias": "mean"}]
    }))
    .unwrap();

    let rows = records(json!([
        {"cat": "x", "name": "a", "amount": 1},
        {"cat": "x", "name": "b", "amount": 5},
        {"cat": "y", "name": "", "amount": 10},
        {"cat": "y", "name": "d", "amount": 9}
    ]));
    let kept = filter(&rows, &filters);
    let grouped = aggregate(&kept, &aggregation);
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped[0].value("mean"), &Value::Number(5.0));
    assert_eq!(grouped[1].value("mean"), &Value::Number(9.0));
}

#[test]
fn nested_fields_filter_and_profile() {
    let rows = records(json!([
        {"id": 1, "customer": {"city": "Brno", "vip": "TRUE"}},
        {"id": 2, "customer": {"city": "Praha", "vip": "false"}},
        {"id": 3, "customer": {"city": "Brno"}}
    ]));
    let brno = filter(&rows, &[FilterSpec::new("customer.city", "equals", "Brno")]);
    assert_eq!(brno.len(), 2);

    let profiles = profile(&rows);
    let vip = profiles
        .iter()
        .find(|p| p.field == "customer.vip")
        .unwrap();
    assert_eq!(vip.inferred_type, InferredType::Boolean);
    assert_eq!(vip.null_count, 1);

    let summary = summarize(&rows);
    assert_eq!(summary.record_count, 3);
    assert_eq!(summary.fields, vec!["id", "customer.city", "customer.vip"]);
}

proptest! {
    #[test]
    fn integers_always_coerce_to_numbers(n in -1_000_000_000i64..1_000_000_000) {
        prop_assert_eq!(coerce_text(&n.to_string()), Value::Number(n as f64));
    }

    #[test]
    fn grouped_thousands_parse_like_plain_numbers(n in 1_000u64..1_000_000_000) {
        let digits = n.to_string();
        let mut grouped = String::new();
        for (idx, ch) in digits.chars().enumerate() {
            if idx > 0 && (digits.len() - idx) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        prop_assert_eq!(coerce_text(&grouped), Value::Number(n as f64));
    }

    #[test]
    fn coercion_is_deterministic_and_trims(text in "\\PC{0,24}") {
        let value = coerce_text(&text);
        prop_assert_eq!(&value, &coerce_text(&format!("  {text}  ")));
        if let Value::Text(inner) = &value {
            prop_assert_eq!(inner.as_str(), inner.trim());
        }
    }

    #[test]
    fn normalized_cells_never_hold_empty_text(cells in proptest::collection::vec("[ a-z0-9]{0,6}", 1..6)) {
        let row = cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| (format!("c{idx}"), json!(cell)))
            .collect::<serde_json::Map<_, _>>();
        let record = normalize_record(&row);
        for path in record.leaf_paths() {
            let value = record.value(&path);
            prop_assert!(!matches!(value, Value::Text(s) if s.is_empty()));
        }
    }
}
