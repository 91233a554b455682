use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, ErrorContext};
use crate::Result;

/// Connection settings for the shared reqwest client.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub proxy_url: Option<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            proxy_url: None,
        }
    }
}

impl TransportSettings {
    /// Defaults overridden by `LLM_HTTP_*` / `LLM_PROXY_URL` environment variables.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        if let Some(secs) = env_parse::<u64>("LLM_HTTP_TIMEOUT_SECS") {
            s.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("LLM_HTTP_POOL_MAX_IDLE_PER_HOST") {
            s.pool_max_idle_per_host = n;
        }
        if let Some(secs) = env_parse::<u64>("LLM_HTTP_POOL_IDLE_TIMEOUT_SECS") {
            s.pool_idle_timeout = Duration::from_secs(secs);
        }
        s.proxy_url = env::var("LLM_PROXY_URL").ok().filter(|v| !v.is_empty());
        s
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Body of a successful response. `json` is `None` when the body is not JSON.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub text: String,
    pub json: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(settings.timeout)
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(Some(settings.pool_idle_timeout))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = &settings.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    format!("Invalid proxy URL: {}", e),
                    ErrorContext::new()
                        .with_field_path("LLM_PROXY_URL")
                        .with_source("http_transport"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| {
            Error::configuration_with_context(
                format!("Failed to build HTTP client: {}", e),
                ErrorContext::new().with_source("http_transport"),
            )
        })?;
        Ok(Self { client })
    }

    /// POST a JSON body and return the response body on 2xx.
    ///
    /// Non-2xx statuses are mapped through [`Error::from_status`]; connection
    /// failures and client-side timeouts become [`Error::Network`].
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &Value,
    ) -> Result<RawResponse> {
        let mut request = self.client.post(url).json(body);
        for (k, v) in headers {
            request = request.header(k.as_str(), v.as_str());
        }

        let response = request.send().await.map_err(|e| Error::Network {
            message: e.to_string(),
            context: ErrorContext::new()
                .with_endpoint(url)
                .with_source("http_transport"),
        })?;

        let status = response.status().as_u16();
        let retry_after_ms = retry_after_ms(response.headers());
        let text = response.text().await.map_err(|e| Error::Network {
            message: format!("Failed to read response body: {}", e),
            context: ErrorContext::new()
                .with_endpoint(url)
                .with_source("http_transport"),
        })?;

        if !(200..300).contains(&status) {
            debug!(status, url, "upstream returned non-success status");
            return Err(Error::from_status(
                status,
                error_message(&text),
                retry_after_ms,
                ErrorContext::new()
                    .with_endpoint(url)
                    .with_source("http_transport"),
            ));
        }

        let json = serde_json::from_str::<Value>(&text).ok();
        Ok(RawResponse { status, text, json })
    }
}

/// Best-effort parsing of `Retry-After`; only the `<seconds>` form is supported.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let secs: f64 = raw.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some((secs * 1000.0) as u64)
}

/// Prefer the vendor's `error.message`; fall back to a bounded body excerpt.
fn error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        let msg = v
            .pointer("/error/message")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str);
        if let Some(m) = msg {
            return m.to_string();
        }
    }
    body.chars().take(500).collect()
}
