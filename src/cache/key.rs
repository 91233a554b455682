//! Request fingerprints.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::drivers::BackendKind;
use crate::types::{Message, RequestOptions};

/// SHA-256 hex digest identifying a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Builds fingerprints from content-affecting request fields only.
///
/// Transport knobs (`stream`, `cache`, `batch`, retry and timeout settings)
/// never change the digest; object keys are sorted recursively before hashing.
#[derive(Debug, Clone, Default)]
pub struct FingerprintGenerator {
    salt: Option<String>,
}

impl FingerprintGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces digests, e.g. per deployment.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Cache fingerprint of `(messages, normalized options)`.
    pub fn fingerprint(&self, messages: &[Message], options: &RequestOptions) -> Fingerprint {
        let mut parts = Map::new();
        parts.insert(
            "messages".into(),
            serde_json::to_value(messages).unwrap_or(Value::Null),
        );
        parts.insert("options".into(), normalized_options(options));
        self.digest(Value::Object(parts))
    }

    /// Batch grouping key: backend plus normalized options, without messages.
    pub fn batch_key(&self, backend: BackendKind, options: &RequestOptions) -> Fingerprint {
        let mut normalized = normalized_options(options);
        normalized["backend"] = json!(backend.id());
        self.digest(json!({ "batch": normalized }))
    }

    fn digest(&self, mut value: Value) -> Fingerprint {
        if let (Some(salt), Value::Object(map)) = (&self.salt, &mut value) {
            map.insert("salt".into(), Value::String(salt.clone()));
        }
        let canonical = serde_json::to_string(&canonicalize(value)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        Fingerprint(hash)
    }
}

fn normalized_options(options: &RequestOptions) -> Value {
    json!({
        "backend": options.backend.map(|b| b.id()),
        "model": options.model,
        "temperature": options.temperature.map(|t| format!("{:.2}", t)),
        "max_tokens": options.max_tokens,
        "format": options.format.as_str(),
        "strict_format": options.strict_format,
        "system_prompt": options.system_prompt,
        "extra": Value::Object(options.extra.clone()),
    })
}

/// Rebuild objects with keys in sorted order, recursively.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
