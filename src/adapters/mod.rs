//! Source adapters and the dispatch table the orchestrator fetches through.
//!
//! Every adapter implements [`SourceAdapter`]: it turns a descriptor into raw
//! JSON objects or one of the [`FetchError`] variants. Scalar coercion is not
//! the adapter's job; the orchestrator normalizes whatever comes back.

pub mod bridge;
pub mod delimited;
pub mod json_api;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use crate::{
    data::RawRecord,
    descriptor::{SourceDescriptor, SourceKind},
    error::{FetchError, FetchResult},
};

pub use bridge::{BridgeCallbackAdapter, CallbackRegistry, HttpScriptLoader, ScriptLoader};
pub use delimited::DelimitedTextAdapter;
pub use json_api::JsonApiAdapter;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(&self, descriptor: &SourceDescriptor) -> FetchResult<Vec<RawRecord>>;
}

/// Adapter per source kind plus the callback registry the bridge adapter uses.
#[derive(Clone)]
pub struct AdapterSet {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
    registry: Arc<CallbackRegistry>,
}

impl AdapterSet {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
            registry: Arc::new(CallbackRegistry::default()),
        }
    }

    /// The three built-in adapters sharing one HTTP client.
    pub fn standard(request_timeout: Duration, bridge_timeout: Duration) -> Self {
        let client = reqwest::Client::new();
        let loader = Arc::new(HttpScriptLoader::new(client.clone(), request_timeout));
        Self::empty()
            .with_bridge(loader, bridge_timeout)
            .with(Arc::new(JsonApiAdapter::new(client.clone(), request_timeout)))
            .with(Arc::new(DelimitedTextAdapter::new(client, request_timeout)))
    }

    /// Registers `adapter` for its kind, replacing any previous one.
    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Registers a bridge adapter wired to this set's callback registry.
    pub fn with_bridge(self, loader: Arc<dyn ScriptLoader>, timeout: Duration) -> Self {
        let registry = Arc::clone(&self.registry);
        self.with(Arc::new(BridgeCallbackAdapter::new(registry, loader, timeout)))
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }
}

/// Interprets a JSON payload as a table of raw records.
///
/// Accepted shapes: an array of objects, an array of rows whose first row
/// holds the field names, or a single object (one record). Data rows whose
/// width differs from the header row are dropped, as are rows with no
/// non-empty cell.
pub fn rows_from_json(payload: JsonValue) -> FetchResult<Vec<RawRecord>> {
    match payload {
        JsonValue::Object(map) => Ok(vec![map]),
        JsonValue::Array(items) if items.is_empty() => Ok(Vec::new()),
        JsonValue::Array(items) if items.iter().all(JsonValue::is_object) => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                JsonValue::Object(map) => Some(map),
                _ => None,
            })
            .collect()),
        JsonValue::Array(items) if items.iter().all(JsonValue::is_array) => {
            Ok(rows_from_grid(items))
        }
        JsonValue::Array(_) => Err(FetchError::parse(
            "expected an array of objects or an array of rows",
        )),
        other => Err(FetchError::parse(format!(
            "expected a JSON object or array, found {}",
            json_type_name(&other)
        ))),
    }
}

fn rows_from_grid(items: Vec<JsonValue>) -> Vec<RawRecord> {
    let mut rows = items.into_iter().filter_map(|item| match item {
        JsonValue::Array(cells) => Some(cells),
        _ => None,
    });
    let Some(header_row) = rows.next() else {
        return Vec::new();
    };
    let headers = header_names(
        header_row
            .iter()
            .map(|cell| cell.as_str().map(str::to_string)),
    );
    rows.filter(|cells| cells.len() == headers.len())
        .filter(|cells| cells.iter().any(|cell| !is_blank(cell)))
        .map(|cells| {
            headers
                .iter()
                .cloned()
                .zip(cells)
                .collect::<Map<String, JsonValue>>()
        })
        .collect()
}

/// Field names for a header row. Missing, blank, non-text and repeated cells
/// are named `column_<position>` so zipping a row into a map loses no cell.
pub(crate) fn header_names<I>(cells: I) -> Vec<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let mut seen = HashSet::new();
    cells
        .into_iter()
        .enumerate()
        .map(|(idx, cell)| {
            let mut name = cell
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty() && !seen.contains(text))
                .unwrap_or_else(|| format!("column_{}", idx + 1));
            while seen.contains(&name) {
                name.push('_');
            }
            seen.insert(name.clone());
            name
        })
        .collect()
}

fn is_blank(cell: &JsonValue) -> bool {
    match cell {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
