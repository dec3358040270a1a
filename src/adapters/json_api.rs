use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{
    Method,
    header::{ACCEPT, HeaderName, HeaderValue},
};
use serde_json::Value as JsonValue;
use url::Url;

use super::{SourceAdapter, rows_from_json};
use crate::{
    data::RawRecord,
    descriptor::{SourceDescriptor, SourceKind},
    error::{FetchError, FetchResult},
};

/// Plain HTTP endpoint returning a JSON array (or a single object).
pub struct JsonApiAdapter {
    client: reqwest::Client,
    timeout: Duration,
}

impl JsonApiAdapter {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn build_request(&self, descriptor: &SourceDescriptor) -> FetchResult<reqwest::RequestBuilder> {
        let raw_url = descriptor.require_str(&["url", "apiUrl"])?;
        let url = Url::parse(raw_url).map_err(|err| {
            FetchError::config(format!(
                "source '{}': invalid url '{raw_url}': {err}",
                descriptor.id
            ))
        })?;
        let method_name = descriptor
            .config_str(&["method"])
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            FetchError::config(format!(
                "source '{}': unsupported HTTP method '{method_name}'",
                descriptor.id
            ))
        })?;

        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in descriptor.config_map("headers")? {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                FetchError::config(format!("source '{}': invalid header name '{name}'", descriptor.id))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|_| {
                FetchError::config(format!(
                    "source '{}': invalid value for header '{name}'",
                    descriptor.id
                ))
            })?;
            request = request.header(header, value);
        }
        if let Some(body) = descriptor.connection_config.get("body")
            && !body.is_null()
        {
            request = request.json(body);
        }
        Ok(request)
    }
}

#[async_trait]
impl SourceAdapter for JsonApiAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::JsonApi
    }

    async fn fetch(&self, descriptor: &SourceDescriptor) -> FetchResult<Vec<RawRecord>> {
        let request = self.build_request(descriptor)?;
        let timeout = descriptor.timeout_override().unwrap_or(self.timeout);

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let reason = status.canonical_reason().unwrap_or("");
                return Err(FetchError::network(
                    format!("HTTP {} {reason}", status.as_u16()).trim_end().to_string(),
                ));
            }
            Ok::<_, FetchError>(response.bytes().await?)
        };
        let body = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| FetchError::Timeout(timeout.as_millis() as u64))??;

        let payload: JsonValue = serde_json::from_slice(&body)
            .map_err(|err| FetchError::parse(format!("response body is not JSON: {err}")))?;
        let rows = rows_from_json(payload)?;
        debug!("JSON source '{}' returned {} record(s)", descriptor.id, rows.len());
        Ok(rows)
    }
}
