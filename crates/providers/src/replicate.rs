//! Replicate backend: translate a chat-completion request into a prediction
//! create, then poll until it resolves (`spec.md` §4.5). Replicate has no
//! chat-completion endpoint of its own, so the request/response shapes are
//! normalized at the edges rather than proxied.
//!
//! Function-calling streaming collapses to a single synthetic SSE chunk
//! once the prediction finishes (Open Question decision in `DESIGN.md`):
//! Replicate's own event stream has no notion of `tool_calls`, so there is
//! nothing meaningful to stream incrementally once tools are in play.

use std::time::Duration;

use fluidmcp_common::{Error, Result};
use fluidmcp_persistence::types::LlmModel;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::ByteStream;

const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";
const DEFAULT_TIMEOUT_SEC: u64 = 120;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct ReplicateBackend {
    model_id: String,
    base_url: String,
    version: String,
    api_key: Option<secrecy::Secret<String>>,
    default_input: serde_json::Value,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: serde_json::Value,
    #[serde(default)]
    error: serde_json::Value,
    urls: PredictionUrls,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: String,
}

impl ReplicateBackend {
    pub fn new(model: &LlmModel) -> Result<Self> {
        let version = model
            .default_params
            .get("version")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                Error::validation(format!(
                    "replicate model `{}` is missing default_params.version",
                    model.model_id
                ))
            })?
            .to_string();

        let mut default_input = model.default_params.clone();
        if let Some(obj) = default_input.as_object_mut() {
            obj.remove("version");
        }

        Ok(Self {
            model_id: model.model_id.clone(),
            base_url: model
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            version,
            api_key: crate::resolve_api_key(model.api_key.as_deref())?,
            default_input,
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

    fn auth_header(&self) -> Option<String> {
        self.api_key
            .as_ref()
            .map(|key| format!("Token {}", key.expose_secret()))
    }

    fn build_input(&self, request: &serde_json::Value) -> serde_json::Value {
        let mut input = self.default_input.clone();
        let Some(obj) = input.as_object_mut() else {
            return input;
        };
        if !obj.contains_key("prompt") {
            obj.insert(
                "prompt".into(),
                serde_json::Value::String(prompt_from_messages(request)),
            );
        }
        input
    }

    async fn create_prediction(&self, input: serde_json::Value) -> Result<Prediction> {
        let mut builder = crate::shared_http_client()
            .post(format!("{}/predictions", self.base_url.trim_end_matches('/')))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "version": self.version, "input": input }));

        if let Some(auth) = self.auth_header() {
            builder = builder.header("Authorization", auth);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::child_error(format!(
                "{} replicate create returned HTTP {status}: {body}",
                self.model_id
            )));
        }

        response.json().await.map_err(map_reqwest_error)
    }

    async fn poll_until_done(&self, mut prediction: Prediction) -> Result<Prediction> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        while !matches!(prediction.status.as_str(), "succeeded" | "failed" | "canceled") {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::timeout(format!(
                    "{} prediction {} did not finish within {:?}",
                    self.model_id, prediction.id, self.timeout
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let mut builder = crate::shared_http_client()
                .get(&prediction.urls.get)
                .timeout(self.timeout);
            if let Some(auth) = self.auth_header() {
                builder = builder.header("Authorization", auth);
            }
            prediction = builder
                .send()
                .await
                .map_err(map_reqwest_error)?
                .json()
                .await
                .map_err(map_reqwest_error)?;
        }

        Ok(prediction)
    }

    fn into_chat_response(prediction: Prediction) -> Result<serde_json::Value> {
        if prediction.status != "succeeded" {
            return Err(Error::child_error(format!(
                "replicate prediction {} ended in status `{}`: {}",
                prediction.id, prediction.status, prediction.error
            )));
        }

        Ok(serde_json::json!({
            "id": prediction.id,
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": output_to_text(&prediction.output),
                },
                "finish_reason": "stop",
            }],
        }))
    }

    pub async fn complete(&self, request: serde_json::Value) -> Result<serde_json::Value> {
        let input = self.build_input(&request);
        let prediction = self.create_prediction(input).await?;
        let prediction = self.poll_until_done(prediction).await?;
        Self::into_chat_response(prediction)
    }

    pub async fn stream(&self, request: serde_json::Value) -> Result<ByteStream> {
        let response = self.complete(request).await?;
        let coda = format!(
            "data: {}\n\ndata: [DONE]\n\n",
            serde_json::to_string(&response).unwrap_or_default()
        );
        Ok(Box::pin(futures::stream::once(async move {
            Ok(bytes::Bytes::from(coda))
        })))
    }
}

fn prompt_from_messages(request: &serde_json::Value) -> String {
    request["messages"]
        .as_array()
        .map(|messages| {
            messages
                .iter()
                .map(|m| {
                    let role = m["role"].as_str().unwrap_or("user");
                    let content = m["content"].as_str().unwrap_or_default();
                    format!("{role}: {content}")
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

fn output_to_text(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
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

    fn test_model(base_url: &str, default_params: serde_json::Value) -> LlmModel {
        LlmModel {
            model_id: "llama-on-replicate".into(),
            backend_type: LlmBackendType::Replicate,
            base_url: Some(base_url.into()),
            api_key: None,
            default_params,
            timeout_sec: 5,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn new_requires_version_in_default_params() {
        let model = test_model("http://example.invalid", serde_json::json!({}));
        let err = ReplicateBackend::new(&model).unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::Validation);
    }

    #[test]
    fn prompt_from_messages_concatenates_role_and_content() {
        let request = serde_json::json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"}
            ]
        });
        assert_eq!(prompt_from_messages(&request), "system: be terse\nuser: hello");
    }

    #[tokio::test]
    async fn complete_polls_until_succeeded_and_normalizes_output() {
        let mut server = mockito::Server::new_async().await;
        let create_mock = server
            .mock("POST", "/predictions")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"id":"abc","status":"starting","output":null,"urls":{{"get":"{}/predictions/abc"}}}}"#,
                server.url()
            ))
            .create_async()
            .await;
        let poll_mock = server
            .mock("GET", "/predictions/abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"abc","status":"succeeded","output":["hel","lo"],"urls":{"get":"ignored"}}"#)
            .create_async()
            .await;

        let model = test_model(&server.url(), serde_json::json!({"version": "abc123"}));
        let backend = ReplicateBackend::new(&model).unwrap();
        let response = backend
            .complete(serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}))
            .await
            .unwrap();

        create_mock.assert_async().await;
        poll_mock.assert_async().await;
        assert_eq!(response["choices"][0]["message"]["content"], "hello");
    }

    #[tokio::test]
    async fn complete_surfaces_failed_status_as_child_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/predictions")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"abc","status":"failed","error":"bad input","urls":{"get":"ignored"}}"#)
            .create_async()
            .await;

        let model = test_model(&server.url(), serde_json::json!({"version": "abc123"}));
        let backend = ReplicateBackend::new(&model).unwrap();
        let err = backend
            .complete(serde_json::json!({"messages": []}))
            .await
            .unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::ChildError);
    }
}
