//! HTTP-backed provider: a vendor driver bound to the shared transport.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::error::{Error, ErrorContext};
use crate::transport::HttpTransport;
use crate::types::{Message, RequestOptions};
use crate::Result;

use super::{create_driver, prepare_messages, BackendKind, Completion, Provider, ProviderDriver};

pub struct HttpProvider {
    kind: BackendKind,
    driver: Box<dyn ProviderDriver>,
    transport: Arc<HttpTransport>,
    base_url: String,
    api_key: String,
    default_model: String,
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl HttpProvider {
    /// `base_url` of `None` selects the vendor default.
    pub fn new(
        kind: BackendKind,
        base_url: Option<&str>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
        transport: Arc<HttpTransport>,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or_else(|| kind.default_base_url())
            .trim_end_matches('/')
            .to_string();
        url::Url::parse(&base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("Invalid base URL '{}': {}", base_url, e),
                ErrorContext::new()
                    .with_field_path(format!("vendors.{}.base_url", kind.id()))
                    .with_source("http_provider"),
            )
        })?;

        Ok(Self {
            kind,
            driver: create_driver(kind),
            transport,
            base_url,
            api_key: api_key.into(),
            default_model: default_model.into(),
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn call(&self, messages: &[Message], options: &RequestOptions) -> Result<Completion> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let prepared = prepare_messages(messages, options);
        let request = self.driver.build_request(&prepared, &model, options)?;
        let url = self.url_for(&request.path);

        let mut headers: Vec<(String, String)> = request.headers.into_iter().collect();
        headers.extend(self.driver.auth_headers(&self.api_key));

        let start = Instant::now();
        let raw = self.transport.post_json(&url, &headers, &request.body).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        match raw.json.as_ref().and_then(|v| self.driver.extract_text(v)) {
            Some(text) => {
                info!(
                    backend = %self.kind,
                    model = %model,
                    duration_ms,
                    chars = text.len(),
                    "upstream call completed"
                );
                Ok(Completion::recognized(text, self.kind.id(), model))
            }
            None => {
                warn!(
                    backend = %self.kind,
                    model = %model,
                    duration_ms,
                    "unrecognized response envelope, passing raw body through"
                );
                Ok(Completion::unrecognized(raw.text, self.kind.id(), model))
            }
        }
    }

    fn name(&self) -> &str {
        self.kind.id()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.base_url.clone())
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.default_model)
    }
}
