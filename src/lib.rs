pub mod adapters;
pub mod aggregate;
pub mod catalog;
pub mod cli;
pub mod data;
pub mod descriptor;
pub mod error;
pub mod export;
pub mod filter;
pub mod orchestrator;
pub mod profile;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde_json::json;

use crate::{
    catalog::{Catalog, SourceProvider},
    cli::{Cli, Commands},
};

pub use aggregate::{
    AggregateFunction, AggregateSpec, AggregationSpec, aggregate, sort_records,
};
pub use catalog::EngineSettings;
pub use data::{Record, Value};
pub use descriptor::{Fingerprint, SourceDescriptor, SourceKind};
pub use error::{FetchError, FetchResult};
pub use filter::{FilterOperator, FilterSpec, filter};
pub use orchestrator::{CacheStatus, Orchestrator};
pub use profile::{DataSummary, FieldProfile, InferredType, NumericSummary, profile, summarize};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("dashfeed", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    runtime.block_on(async {
        match cli.command {
            Commands::Sources(args) => handle_sources(&args),
            Commands::Fetch(args) => handle_fetch(&args).await,
            Commands::Profile(args) => handle_profile(&args).await,
        }
    })
}

fn load_catalog(args: &cli::CatalogArgs) -> Result<Catalog> {
    Catalog::load(&args.catalog).with_context(|| format!("Loading catalog {:?}", args.catalog))
}

async fn load_source(catalog: &Catalog, source_id: &str) -> Result<Vec<Record>> {
    let descriptor = catalog
        .get_source(source_id)
        .ok_or_else(|| anyhow!("Source '{source_id}' is not defined in the catalog"))?;
    let orchestrator = Orchestrator::new(&catalog.settings);
    let records = orchestrator
        .load(&descriptor, false)
        .await
        .with_context(|| format!("Loading source '{source_id}'"))?;
    info!(
        "Loaded {} record(s) from source '{source_id}' ({})",
        records.len(),
        descriptor.kind
    );
    Ok(records.to_vec())
}

fn handle_sources(args: &cli::SourcesArgs) -> Result<()> {
    let catalog = load_catalog(&args.catalog)?;
    let headers = ["id", "kind", "fingerprint"].map(String::from).to_vec();
    let rows = catalog
        .list_sources()
        .iter()
        .map(|source| {
            let fingerprint = source.fingerprint();
            vec![
                source.id.clone(),
                source.kind.to_string(),
                fingerprint.digest()[..12].to_string(),
            ]
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &rows));
    info!("Listed {} source(s)", rows.len());
    Ok(())
}

async fn handle_fetch(args: &cli::FetchArgs) -> Result<()> {
    let catalog = load_catalog(&args.catalog)?;
    let filters = filter::parse_filters(&args.filters)?;
    let aggregates = aggregate::parse_aggregates(&args.aggregates)?;
    let records = load_source(&catalog, &args.source).await?;

    let mut rows = filter::filter(&records, &filters);
    debug!("{} of {} record(s) passed filters", rows.len(), records.len());
    if let Some(group_by) = &args.group_by {
        let spec = AggregationSpec::new(group_by.clone(), aggregates);
        rows = aggregate::aggregate(&rows, &spec);
        debug!("Aggregated into {} group(s) by '{group_by}'", rows.len());
    }
    if let Some(sort) = &args.sort {
        rows = aggregate::sort_records(&rows, &sort.field, sort.descending);
    }
    if let Some(limit) = args.limit {
        rows.truncate(limit);
    }

    match args.format.export_format() {
        Some(format) => export::write_records(&rows, format, args.output.as_deref())?,
        None => print!("{}", table::render_records(&rows)),
    }
    info!("Emitted {} record(s)", rows.len());
    Ok(())
}

async fn handle_profile(args: &cli::ProfileArgs) -> Result<()> {
    let catalog = load_catalog(&args.catalog)?;
    let filters = filter::parse_filters(&args.filters)?;
    let records = load_source(&catalog, &args.source).await?;
    let rows = filter::filter(&records, &filters);
    let profiles = profile::profile(&rows);

    if args.json {
        let report = json!({
            "summary": profile::summarize(&rows),
            "fields": profiles,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Serializing profile")?
        );
    } else {
        print!("{}", table::render_profiles(&profiles));
    }
    info!(
        "Profiled {} field(s) across {} record(s)",
        profiles.len(),
        rows.len()
    );
    Ok(())
}
