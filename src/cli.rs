use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::export::ExportFormat;

pub const DEFAULT_CATALOG: &str = "dashfeed.yml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Fetch, cache, filter and aggregate tabular data sources", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the sources defined in a catalog
    Sources(SourcesArgs),
    /// Fetch a source, then optionally filter, aggregate, sort and export it
    Fetch(FetchArgs),
    /// Infer field types and null/unique counts for a source
    Profile(ProfileArgs),
}

#[derive(Debug, Args)]
pub struct CatalogArgs {
    /// YAML catalog describing sources and engine settings
    #[arg(short = 'c', long = "catalog", default_value = DEFAULT_CATALOG)]
    pub catalog: PathBuf,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
    /// Id of the source to fetch
    #[arg(short = 's', long = "source")]
    pub source: String,
    /// Record filters such as `amount>=100` or `name contains ali` (AND-ed)
    #[arg(long = "filter", action = clap::ArgAction::Append)]
    pub filters: Vec<String>,
    /// Field to group by before aggregating
    #[arg(long = "group-by")]
    pub group_by: Option<String>,
    /// Aggregates of the form `field:function[:alias]` (requires --group-by)
    #[arg(long = "agg", action = clap::ArgAction::Append, requires = "group_by")]
    pub aggregates: Vec<String>,
    /// Sort directive of the form `field[:asc|desc]`
    #[arg(long = "sort", value_parser = parse_sort)]
    pub sort: Option<SortDirective>,
    /// Limit number of records emitted
    #[arg(long)]
    pub limit: Option<usize>,
    /// Output format
    #[arg(long = "format", value_enum, default_value = "table")]
    pub format: OutputFormat,
    /// Output file for json/csv formats (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,
    /// Id of the source to profile
    #[arg(short = 's', long = "source")]
    pub source: String,
    /// Record filters applied before profiling
    #[arg(long = "filter", action = clap::ArgAction::Append)]
    pub filters: Vec<String>,
    /// Emit the profile as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn export_format(self) -> Option<ExportFormat> {
        match self {
            OutputFormat::Table => None,
            OutputFormat::Json => Some(ExportFormat::Json),
            OutputFormat::Csv => Some(ExportFormat::Csv),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDirective {
    pub field: String,
    pub descending: bool,
}

pub fn parse_sort(value: &str) -> Result<SortDirective, String> {
    let (field, direction) = match value.rsplit_once(':') {
        Some((field, direction)) => (field.trim(), Some(direction.trim())),
        None => (value.trim(), None),
    };
    if field.is_empty() {
        return Err("Sort field cannot be empty".to_string());
    }
    let descending = match direction.map(str::to_ascii_lowercase).as_deref() {
        None | Some("asc") => false,
        Some("desc") => true,
        Some(other) => return Err(format!("Unknown sort direction '{other}'")),
    };
    Ok(SortDirective {
        field: field.to_string(),
        descending,
    })
}
