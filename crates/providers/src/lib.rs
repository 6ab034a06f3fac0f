//! LLM Dispatcher backends: route a chat-completion request to the
//! configured inference service and normalize its response/stream shape.
//!
//! Each [`fluidmcp_persistence::types::LlmBackendType`] maps to one backend
//! implementation. [`Backend`] erases that choice behind a single type so
//! the gateway layer can hold a `Backend` without matching on it, while
//! still exposing both the non-streaming [`fluidmcp_router::ChatBackend`]
//! seam the Function-Call Router drives and a raw byte-stream passthrough
//! for direct client streaming.

pub mod openai_compat;
pub mod replicate;

use std::sync::Arc;

use fluidmcp_common::{Error, Result};
use fluidmcp_persistence::types::{LlmBackendType, LlmModel};

#[cfg(feature = "metrics")]
use fluidmcp_metrics::{counter, histogram, labels, llm as llm_metrics};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Shared HTTP client for all dispatcher backends.
///
/// Reused across requests so connection pools, DNS caching, and TLS
/// session resumption are shared rather than rebuilt per dispatch.
pub fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> =
        std::sync::LazyLock::new(reqwest::Client::new);
    &CLIENT
}

/// A chunk of a raw, already-framed SSE byte stream forwarded verbatim.
pub type ByteStream =
    std::pin::Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes>> + Send>>;

/// Resolve `api_key` against its persisted contract: either a literal
/// secret value or a whole-string `${ENV_VAR}` placeholder, expanded here
/// and only here — never written back to storage.
pub fn resolve_api_key(api_key: Option<&str>) -> Result<Option<secrecy::Secret<String>>> {
    resolve_api_key_with(api_key, |name| std::env::var(name).ok())
}

/// Same as [`resolve_api_key`] but with the environment lookup injected,
/// so tests don't need to mutate real process environment variables.
fn resolve_api_key_with(
    api_key: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<secrecy::Secret<String>>> {
    let Some(raw) = api_key.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Some(var_name) = raw.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        let value = lookup(var_name).ok_or_else(|| {
            Error::backend_auth(format!(
                "model api_key references environment variable `{var_name}`, which is not set"
            ))
        })?;
        return Ok(Some(secrecy::Secret::new(value)));
    }

    Ok(Some(secrecy::Secret::new(raw.to_string())))
}

/// A configured LLM backend, dispatched on [`LlmBackendType`].
pub enum Backend {
    OpenAiCompat(openai_compat::OpenAiCompatBackend),
    Replicate(replicate::ReplicateBackend),
}

impl Backend {
    /// Build the backend for a model, resolving its `api_key` placeholder
    /// immediately so a misconfigured model fails at dispatch time rather
    /// than buried inside the first HTTP call.
    pub fn build(model: &LlmModel) -> Result<Self> {
        match model.backend_type {
            LlmBackendType::Vllm | LlmBackendType::Ollama | LlmBackendType::HttpOpenai => Ok(
                Self::OpenAiCompat(openai_compat::OpenAiCompatBackend::new(model)?),
            ),
            LlmBackendType::Replicate => {
                Ok(Self::Replicate(replicate::ReplicateBackend::new(model)?))
            },
        }
    }

    /// Non-streaming completion, shared by the Function-Call Router loop
    /// and by direct (non-streaming) client requests.
    pub async fn complete(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let result = match self {
            Self::OpenAiCompat(backend) => backend.complete(request).await,
            Self::Replicate(backend) => backend.complete(request).await,
        };

        #[cfg(feature = "metrics")]
        match &result {
            Ok(_) => {
                let duration = start.elapsed().as_secs_f64();
                counter!(
                    llm_metrics::COMPLETIONS_TOTAL,
                    labels::MODEL => self.model_id().to_string(),
                    labels::BACKEND => self.backend_label()
                )
                .increment(1);
                histogram!(
                    llm_metrics::COMPLETION_DURATION_SECONDS,
                    labels::MODEL => self.model_id().to_string(),
                    labels::BACKEND => self.backend_label()
                )
                .record(duration);
            },
            Err(_) => {
                counter!(
                    llm_metrics::COMPLETION_ERRORS_TOTAL,
                    labels::MODEL => self.model_id().to_string(),
                    labels::BACKEND => self.backend_label()
                )
                .increment(1);
            },
        }

        result
    }

    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn model_id(&self) -> &str {
        match self {
            Self::OpenAiCompat(backend) => backend.model_id(),
            Self::Replicate(backend) => backend.model_id(),
        }
    }

    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn backend_label(&self) -> String {
        match self {
            Self::OpenAiCompat(_) => "openai_compat".to_string(),
            Self::Replicate(_) => "replicate".to_string(),
        }
    }

    /// Raw streamed response, forwarded to the client byte-for-byte.
    /// Callers that need to drive tool-calling must not use this path —
    /// the Dispatcher hands tool-enabled requests to the router instead
    /// (`spec.md` §4.5, "Tool opt-in").
    pub async fn stream(&self, request: serde_json::Value) -> Result<ByteStream> {
        match self {
            Self::OpenAiCompat(backend) => backend.stream(request).await,
            Self::Replicate(backend) => backend.stream(request).await,
        }
    }
}

/// Adapts [`Backend`] to the seam the Function-Call Router depends on.
/// `fluidmcp_router::Error` has no variant for the richer
/// [`fluidmcp_common::ErrorKind`] taxonomy, so failures collapse to its
/// single `Backend(String)` variant here.
#[async_trait::async_trait]
impl fluidmcp_router::ChatBackend for Backend {
    async fn complete(&self, request: serde_json::Value) -> fluidmcp_router::Result<serde_json::Value> {
        Backend::complete(self, request)
            .await
            .map_err(|e| fluidmcp_router::Error::Backend(e.to_string()))
    }
}

/// Convenience wrapper so gateway handlers can hold `Arc<dyn ChatBackend>`
/// without naming `Backend` directly.
pub fn as_chat_backend(backend: Backend) -> Arc<dyn fluidmcp_router::ChatBackend> {
    Arc::new(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_api_key_literal_passthrough() {
        let resolved = resolve_api_key(Some("sk-literal")).unwrap();
        assert_eq!(
            secrecy::ExposeSecret::expose_secret(&resolved.unwrap()),
            "sk-literal"
        );
    }

    #[test]
    fn resolve_api_key_none_is_none() {
        assert!(resolve_api_key(None).unwrap().is_none());
    }

    #[test]
    fn resolve_api_key_expands_env_placeholder() {
        let resolved = resolve_api_key_with(Some("${REPLICATE_API_TOKEN}"), |name| {
            (name == "REPLICATE_API_TOKEN").then(|| "resolved-value".to_string())
        })
        .unwrap();
        assert_eq!(
            secrecy::ExposeSecret::expose_secret(&resolved.unwrap()),
            "resolved-value"
        );
    }

    #[test]
    fn resolve_api_key_missing_env_var_is_backend_auth_error() {
        let err = resolve_api_key_with(Some("${REPLICATE_API_TOKEN}"), |_| None).unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::BackendAuth);
    }
}
