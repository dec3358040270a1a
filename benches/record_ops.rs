use criterion::{Criterion, criterion_group, criterion_main};
use dashfeed::{
    AggregateSpec, AggregationSpec, FilterSpec, Record, aggregate,
    adapters::delimited::parse_delimited, data::normalize_records, filter, profile,
};
use std::hint::black_box;

fn generate_orders(rows: usize) -> String {
    let mut text = String::from("id,ordered_at,status,region,amount\n");
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let region = ["north", "south", "east", "west"][i % 4];
        let day = (i % 28) + 1;
        let amount = (i * 37) % 5000;
        text.push_str(&format!(
            "{i},2024-01-{day:02},{status},{region},\"${},{:03}.50\"\n",
            amount / 1000 + 1,
            amount % 1000
        ));
    }
    text
}

fn load_orders(rows: usize) -> Vec<Record> {
    let table = parse_delimited(&generate_orders(rows), b',', true).expect("parse orders");
    normalize_records(&table.rows)
}

fn bench_record_ops(c: &mut Criterion) {
    let text = generate_orders(20_000);
    let records = load_orders(20_000);
    let filters = vec![
        FilterSpec::from_text("status", "equals", "shipped"),
        FilterSpec::from_text("amount", ">=", "2000"),
    ];
    let aggregation = AggregationSpec::new(
        "region",
        vec![
            AggregateSpec::new("amount", "sum"),
            AggregateSpec::new("amount", "avg"),
            AggregateSpec::new("ordered_at", "last"),
        ],
    );

    let mut group = c.benchmark_group("record_ops");
    group.bench_function("parse_and_normalize", |b| {
        b.iter(|| {
            let table = parse_delimited(black_box(&text), b',', true).expect("parse");
            normalize_records(&table.rows)
        })
    });
    group.bench_function("filter", |b| {
        b.iter(|| filter(black_box(&records), black_box(&filters)))
    });
    group.bench_function("aggregate", |b| {
        b.iter(|| aggregate(black_box(&records), black_box(&aggregation)))
    });
    group.bench_function("profile", |b| b.iter(|| profile(black_box(&records))));
    group.finish();
}

criterion_group!(benches, bench_record_ops);
criterion_main!(benches);
