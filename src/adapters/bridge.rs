//! Callback-bridge adapter for endpoints that cannot be read directly.
//!
//! The remote side answers with a small script of the form
//! `token({"success": true, "data": [...]});`. The adapter registers a one-shot
//! handler under a fresh token, loads the script in a background task, and
//! waits for the handler to fire. The handler registration and the loader task
//! are both owned by guards, so success, failure, timeout and caller
//! cancellation all release them.

use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::{sync::oneshot, task::JoinHandle};
use url::Url;
use uuid::Uuid;

use super::{SourceAdapter, rows_from_json};
use crate::{
    data::RawRecord,
    descriptor::{SourceDescriptor, SourceKind},
    error::{FetchError, FetchResult},
};

pub const DEFAULT_ACTION: &str = "custom";
pub const DEFAULT_RANGE: &str = "A1:Z1000";
pub const CALLBACK_PARAM: &str = "callback";
const TOKEN_PREFIX: &str = "dashfeed_cb";

static INVOCATION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(?:/\*\*/)?\s*([A-Za-z_$][\w$]*)\s*\((.*)\)\s*;?\s*$").ok()
});

/// One-shot handlers keyed by callback token.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    handlers: Mutex<HashMap<String, oneshot::Sender<JsonValue>>>,
    sequence: AtomicU64,
}

impl CallbackRegistry {
    fn handlers(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<JsonValue>>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a handler under a process-unique token. The handler stays
    /// registered until the returned guard is dropped or it is invoked.
    pub fn register(self: &Arc<Self>) -> (CallbackRegistration, oneshot::Receiver<JsonValue>) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let token = format!(
            "{TOKEN_PREFIX}_{sequence}_{}",
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let (sender, receiver) = oneshot::channel();
        self.handlers().insert(token.clone(), sender);
        debug!("Registered callback handler {token}");
        (
            CallbackRegistration {
                registry: Arc::clone(self),
                token,
            },
            receiver,
        )
    }

    /// Delivers `argument` to the handler registered under `token`.
    /// Returns false when no such handler exists.
    pub fn invoke(&self, token: &str, argument: JsonValue) -> bool {
        let Some(sender) = self.handlers().remove(token) else {
            warn!("Callback '{token}' invoked but no handler is registered");
            return false;
        };
        sender.send(argument).is_ok()
    }

    pub fn is_registered(&self, token: &str) -> bool {
        self.handlers().contains_key(token)
    }

    pub fn registered_count(&self) -> usize {
        self.handlers().len()
    }

    fn deregister(&self, token: &str) {
        if self.handlers().remove(token).is_some() {
            debug!("Deregistered callback handler {token}");
        }
    }
}

/// Keeps a callback token registered for as long as it lives.
#[derive(Debug)]
pub struct CallbackRegistration {
    registry: Arc<CallbackRegistry>,
    token: String,
}

impl CallbackRegistration {
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Drop for CallbackRegistration {
    fn drop(&mut self) {
        self.registry.deregister(&self.token);
    }
}

/// Fetches the script text behind a bridge URL.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load(&self, url: &Url) -> FetchResult<String>;
}

pub struct HttpScriptLoader {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpScriptLoader {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl ScriptLoader for HttpScriptLoader {
    async fn load(&self, url: &Url) -> FetchResult<String> {
        let request = async {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::network(format!("HTTP {status} loading bridge script")));
            }
            Ok::<_, FetchError>(response.text().await?)
        };
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| FetchError::Timeout(self.timeout.as_millis() as u64))?
    }
}

/// Runs `name(<json>)` scripts against the registry. Scripts in any other
/// shape are a parse error.
pub fn evaluate_script(source: &str, registry: &CallbackRegistry) -> FetchResult<bool> {
    let captures = INVOCATION
        .as_ref()
        .and_then(|re| re.captures(source))
        .ok_or_else(|| FetchError::parse("bridge response is not a callback invocation"))?;
    let name = &captures[1];
    let argument: JsonValue = serde_json::from_str(captures[2].trim())
        .map_err(|err| FetchError::parse(format!("bridge callback argument: {err}")))?;
    Ok(registry.invoke(name, argument))
}

/// The background task that loads and runs one script. Dropping it aborts the
/// task, which unloads the script if it has not run yet.
struct LoadedScript {
    handle: JoinHandle<FetchResult<()>>,
}

impl LoadedScript {
    fn spawn(loader: Arc<dyn ScriptLoader>, registry: Arc<CallbackRegistry>, url: Url) -> Self {
        let handle = tokio::spawn(async move {
            let source = loader.load(&url).await?;
            evaluate_script(&source, &registry)?;
            Ok::<(), FetchError>(())
        });
        Self { handle }
    }

    /// Resolves only when loading or evaluating failed.
    async fn failure(&mut self) -> FetchError {
        match (&mut self.handle).await {
            Ok(Err(err)) => err,
            Ok(Ok(())) => std::future::pending().await,
            Err(join) => FetchError::network(format!("bridge script task stopped: {join}")),
        }
    }
}

impl Drop for LoadedScript {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Deserialize)]
struct BridgeEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<JsonValue>,
    #[serde(default)]
    error: Option<JsonValue>,
}

impl BridgeEnvelope {
    fn into_records(self) -> FetchResult<Vec<RawRecord>> {
        if !self.success {
            let message = match self.error {
                Some(JsonValue::String(text)) => text,
                Some(other) => other.to_string(),
                None => "bridge reported failure without an error message".to_string(),
            };
            return Err(FetchError::Network(message));
        }
        match self.data {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(JsonValue::Object(mut map)) if map.get("data").is_some_and(JsonValue::is_array) => {
                rows_from_json(map.remove("data").unwrap_or(JsonValue::Null))
            }
            Some(data) => rows_from_json(data),
        }
    }
}

pub struct BridgeCallbackAdapter {
    registry: Arc<CallbackRegistry>,
    loader: Arc<dyn ScriptLoader>,
    timeout: Duration,
}

impl BridgeCallbackAdapter {
    pub fn new(
        registry: Arc<CallbackRegistry>,
        loader: Arc<dyn ScriptLoader>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            loader,
            timeout,
        }
    }
}

/// Builds the bridge request URL: descriptor parameters, the callback token
/// and a cache-busting nonce.
pub fn request_url(descriptor: &SourceDescriptor, token: &str, nonce: &str) -> FetchResult<Url> {
    let base = descriptor.require_str(&["url", "gasUrl"])?;
    let mut url = Url::parse(base).map_err(|err| {
        FetchError::config(format!(
            "source '{}': invalid url '{base}': {err}",
            descriptor.id
        ))
    })?;
    let extra = descriptor.config_map("params")?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair(
            "action",
            descriptor.config_str(&["action"]).unwrap_or(DEFAULT_ACTION),
        );
        if let Some(sheet) = descriptor.config_str(&["sheetId", "sheet_id"]) {
            query.append_pair("sheetId", sheet);
        }
        query.append_pair(
            "range",
            descriptor.config_str(&["range"]).unwrap_or(DEFAULT_RANGE),
        );
        for (name, value) in &extra {
            query.append_pair(name, value);
        }
        query.append_pair(CALLBACK_PARAM, token);
        query.append_pair("_", nonce);
    }
    Ok(url)
}

async fn wait_for_callback(
    receiver: oneshot::Receiver<JsonValue>,
    script: &mut LoadedScript,
) -> FetchResult<JsonValue> {
    tokio::select! {
        biased;
        argument = receiver => argument
            .map_err(|_| FetchError::network("callback handler released before invocation")),
        failure = script.failure() => Err(failure),
    }
}

#[async_trait]
impl SourceAdapter for BridgeCallbackAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::BridgeCallback
    }

    async fn fetch(&self, descriptor: &SourceDescriptor) -> FetchResult<Vec<RawRecord>> {
        let timeout = descriptor.timeout_override().unwrap_or(self.timeout);
        let (registration, receiver) = self.registry.register();
        let nonce = Uuid::new_v4().simple().to_string();
        let url = request_url(descriptor, registration.token(), &nonce)?;
        debug!(
            "Loading bridge script for '{}' with callback {}",
            descriptor.id,
            registration.token()
        );

        let mut script = LoadedScript::spawn(
            Arc::clone(&self.loader),
            Arc::clone(&self.registry),
            url,
        );
        let outcome = tokio::time::timeout(timeout, wait_for_callback(receiver, &mut script)).await;
        drop(script);
        drop(registration);

        let argument = outcome.map_err(|_| {
            warn!(
                "Bridge source '{}' did not answer within {} ms",
                descriptor.id,
                timeout.as_millis()
            );
            FetchError::Timeout(timeout.as_millis() as u64)
        })??;
        let envelope: BridgeEnvelope = serde_json::from_value(argument)
            .map_err(|err| FetchError::parse(format!("bridge envelope: {err}")))?;
        envelope.into_records()
    }
}
