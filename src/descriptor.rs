//! Source descriptors: what a source is and how to reach it.
//!
//! A descriptor is handed to the engine on every call; the engine never stores
//! it beyond deriving a [`Fingerprint`], so editing a source's configuration
//! naturally routes the next load past any cached payload.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::{FetchError, FetchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    #[serde(alias = "google-sheets")]
    BridgeCallback,
    JsonApi,
    #[serde(alias = "csv-file")]
    DelimitedText,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::BridgeCallback => "bridge-callback",
            SourceKind::JsonApi => "json-api",
            SourceKind::DelimitedText => "delimited-text",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default, rename = "config")]
    pub connection_config: BTreeMap<String, JsonValue>,
}

/// Deterministic cache and coalescing key for one descriptor value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    source_id: String,
    digest: String,
}

impl Fingerprint {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.source_id, &self.digest[..12.min(self.digest.len())])
    }
}

impl SourceDescriptor {
    pub fn new(id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            connection_config: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.connection_config.insert(key.into(), value.into());
        self
    }

    /// Hash of id, kind and the canonical (key-sorted) connection config.
    pub fn fingerprint(&self) -> Fingerprint {
        let config = canonical_json(&JsonValue::Object(
            self.connection_config
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ));
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(config.as_bytes());
        let digest = hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Fingerprint {
            source_id: self.id.clone(),
            digest,
        }
    }

    /// First non-empty string found under any of `keys`.
    pub fn config_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.connection_config.get(*key))
            .filter_map(JsonValue::as_str)
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    pub fn require_str(&self, keys: &[&str]) -> FetchResult<&str> {
        self.config_str(keys).ok_or_else(|| {
            FetchError::config(format!(
                "source '{}' ({}) is missing required field '{}'",
                self.id, self.kind, keys[0]
            ))
        })
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        match self.connection_config.get(key)? {
            JsonValue::Bool(flag) => Some(*flag),
            JsonValue::String(text) => crate::data::parse_bool(text),
            _ => None,
        }
    }

    pub fn config_map(&self, key: &str) -> FetchResult<BTreeMap<String, String>> {
        match self.connection_config.get(key) {
            None | Some(JsonValue::Null) => Ok(BTreeMap::new()),
            Some(JsonValue::Object(map)) => Ok(map
                .iter()
                .map(|(name, value)| {
                    let text = match value {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), text)
                })
                .collect()),
            Some(_) => Err(FetchError::config(format!(
                "source '{}': field '{key}' must be a map",
                self.id
            ))),
        }
    }

    /// Per-source override of an adapter timeout, read from `timeout_ms`.
    pub fn timeout_override(&self) -> Option<Duration> {
        match self.connection_config.get("timeout_ms")? {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
    }

    /// Checks the fields each kind cannot work without.
    pub fn validate(&self) -> FetchResult<()> {
        if self.id.trim().is_empty() {
            return Err(FetchError::config("source id must not be empty"));
        }
        match self.kind {
            SourceKind::BridgeCallback => {
                self.require_str(&["url", "gasUrl"])?;
            }
            SourceKind::JsonApi => {
                self.require_str(&["url", "apiUrl"])?;
            }
            SourceKind::DelimitedText => {
                if self.config_str(&["text", "path", "url", "csvUrl"]).is_none() {
                    return Err(FetchError::config(format!(
                        "source '{}' (delimited-text) needs one of 'text', 'path' or 'url'",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// JSON text with object keys sorted at every depth.
fn canonical_json(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let sorted = map.iter().collect::<BTreeMap<_, _>>();
            let body = sorted
                .into_iter()
                .map(|(key, value)| {
                    format!("{}:{}", JsonValue::from(key.as_str()), canonical_json(value))
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        JsonValue::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        scalar => scalar.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SourceDescriptor {
        SourceDescriptor::new("sales", SourceKind::JsonApi)
            .with_config("url", "https://example.test/sales")
            .with_config("method", "GET")
    }

    #[test]
    fn fingerprint_is_stable_and_key_order_independent() {
        let a = sample();
        let b = SourceDescriptor::new("sales", SourceKind::JsonApi)
            .with_config("method", "GET")
            .with_config("url", "https://example.test/sales");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().source_id(), "sales");
        assert_eq!(a.fingerprint().digest().len(), 64);
    }

    #[test]
    fn fingerprint_ignores_nested_key_order() {
        let a = sample().with_config("headers", serde_json::json!({"a": "1", "b": "2"}));
        let b = sample().with_config("headers", serde_json::json!({"b": "2", "a": "1"}));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_config() {
        let a = sample();
        let b = sample().with_config("url", "https://example.test/other");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn validate_reports_missing_fields() {
        let missing = SourceDescriptor::new("x", SourceKind::JsonApi);
        assert!(matches!(missing.validate(), Err(FetchError::Config(_))));
        let legacy = SourceDescriptor::new("x", SourceKind::JsonApi).with_config("apiUrl", "http://a");
        assert!(legacy.validate().is_ok());
        let csv = SourceDescriptor::new("c", SourceKind::DelimitedText).with_config("text", "a,b");
        assert!(csv.validate().is_ok());
    }

    #[test]
    fn kind_accepts_legacy_names() {
        let parsed: SourceKind = serde_json::from_str("\"google-sheets\"").unwrap();
        assert_eq!(parsed, SourceKind::BridgeCallback);
        let parsed: SourceKind = serde_json::from_str("\"csv-file\"").unwrap();
        assert_eq!(parsed, SourceKind::DelimitedText);
    }

    #[test]
    fn timeout_override_reads_number_or_text() {
        let d = sample().with_config("timeout_ms", 250);
        assert_eq!(d.timeout_override(), Some(Duration::from_millis(250)));
        let d = sample().with_config("timeout_ms", "0");
        assert_eq!(d.timeout_override(), None);
    }
}
