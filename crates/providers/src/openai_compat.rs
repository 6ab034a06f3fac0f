//! OpenAI-compatible backend: vLLM, Ollama, and any server implementing
//! `POST /chat/completions` (`spec.md` §4.5). The request body is proxied
//! unchanged except for the model name and authorization header; streaming
//! responses are forwarded byte-for-byte rather than re-parsed.

use std::time::Duration;

use fluidmcp_common::{Error, Result};
use fluidmcp_persistence::types::LlmModel;
use secrecy::ExposeSecret;

use crate::ByteStream;

const DEFAULT_TIMEOUT_SEC: u64 = 120;

#[derive(Debug)]
pub struct OpenAiCompatBackend {
    model_id: String,
    base_url: String,
    api_key: Option<secrecy::Secret<String>>,
    timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(model: &LlmModel) -> Result<Self> {
        let base_url = model
            .base_url
            .clone()
            .ok_or_else(|| Error::validation(format!("model `{}` has no base_url", model.model_id)))?;

        Ok(Self {
            model_id: model.model_id.clone(),
            base_url,
            api_key: crate::resolve_api_key(model.api_key.as_deref())?,
            timeout: Duration::from_secs(if model.timeout_sec == 0 {
                DEFAULT_TIMEOUT_SEC
            } else {
                model.timeout_sec
            }),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        mut request: serde_json::Value,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        if let Some(obj) = request.as_object_mut() {
            obj.insert("model".into(), serde_json::Value::String(self.model_id.clone()));
            obj.insert("stream".into(), serde_json::Value::Bool(stream));
        }

        let mut builder = crate::shared_http_client()
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&request);

        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        builder
    }

    pub async fn complete(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .build_request(request, false)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::child_error(format!(
                "{} backend returned HTTP {status}: {body}",
                self.model_id
            )));
        }

        response.json().await.map_err(map_reqwest_error)
    }

    pub async fn stream(&self, request: serde_json::Value) -> Result<ByteStream> {
        let response = self
            .build_request(request, true)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::child_error(format!(
                "{} backend returned HTTP {status}: {body}",
                self.model_id
            )));
        }

        Ok(Box::pin(futures::StreamExt::map(
            response.bytes_stream(),
            |chunk| chunk.map_err(map_reqwest_error),
        )))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(err.to_string())
    } else {
        Error::other(err)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use fluidmcp_persistence::types::LlmBackendType;

    use super::*;

    fn test_model(base_url: &str) -> LlmModel {
        LlmModel {
            model_id: "local-llama".into(),
            backend_type: LlmBackendType::Vllm,
            base_url: Some(base_url.into()),
            api_key: None,
            default_params: serde_json::json!({}),
            timeout_sec: 5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn new_rejects_missing_base_url() {
        let mut model = test_model("http://localhost:8001/v1");
        model.base_url = None;
        let err = OpenAiCompatBackend::new(&model).unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn complete_replaces_model_and_forces_non_streaming() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "local-llama",
                "stream": false
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}]}"#)
            .create_async()
            .await;

        let backend = OpenAiCompatBackend::new(&test_model(&server.url())).unwrap();
        let response = backend
            .complete(serde_json::json!({"model": "ignored", "messages": []}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response["choices"][0]["message"]["content"], "hi");
    }

    #[tokio::test]
    async fn complete_maps_http_error_status_to_child_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let backend = OpenAiCompatBackend::new(&test_model(&server.url())).unwrap();
        let err = backend
            .complete(serde_json::json!({"messages": []}))
            .await
            .unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::ChildError);
    }

    #[tokio::test]
    async fn complete_sends_bearer_auth_header_when_api_key_present() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let mut model = test_model(&server.url());
        model.api_key = Some("sk-test".into());
        let backend = OpenAiCompatBackend::new(&model).unwrap();
        backend
            .complete(serde_json::json!({"messages": []}))
            .await
            .unwrap();

        mock.assert_async().await;
    }
}
