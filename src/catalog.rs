//! Source catalog: the YAML file that lists data sources and engine settings.
//!
//! ```yaml
//! settings:
//!   cache_ttl_secs: 900
//!   bridge_timeout_ms: 30000
//!   request_timeout_ms: 30000
//! sources:
//!   - id: sales
//!     kind: json-api
//!     config:
//!       url: https://api.example.com/sales
//! ```
//!
//! The engine never persists descriptors itself; it asks a [`SourceProvider`]
//! for them and receives owned copies.

use std::{collections::HashSet, fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::descriptor::SourceDescriptor;

pub const DEFAULT_CACHE_TTL_SECS: u64 = 15 * 60;
pub const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Read side of the configuration collaborator.
pub trait SourceProvider {
    fn list_sources(&self) -> Vec<SourceDescriptor>;

    fn get_source(&self, id: &str) -> Option<SourceDescriptor>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub cache_ttl_secs: u64,
    pub bridge_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            bridge_timeout_ms: DEFAULT_BRIDGE_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl EngineSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub settings: EngineSettings,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening catalog file {path:?}"))?;
        let reader = BufReader::new(file);
        let catalog: Catalog = serde_yaml::from_reader(reader).context("Parsing catalog YAML")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(contents).context("Parsing catalog YAML")?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        if self.settings.bridge_timeout_ms == 0 || self.settings.request_timeout_ms == 0 {
            bail!("Adapter timeouts must be greater than zero");
        }
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                bail!("Catalog contains a source with an empty id");
            }
            if !seen.insert(source.id.as_str()) {
                bail!("Duplicate source id '{}' in catalog", source.id);
            }
        }
        Ok(())
    }
}

impl SourceProvider for Catalog {
    fn list_sources(&self) -> Vec<SourceDescriptor> {
        self.sources.clone()
    }

    fn get_source(&self, id: &str) -> Option<SourceDescriptor> {
        self.sources.iter().find(|source| source.id == id).cloned()
    }
}
