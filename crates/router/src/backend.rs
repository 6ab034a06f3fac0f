//! Seam between the router and whatever LLM backend actually serves a
//! completion. `fluidmcp-providers` implements this for each backend type;
//! the router never depends on a concrete backend, matching the duck-typed
//! `vllm_client` parameter `function_router.py::_call_vllm` accepts (an
//! OpenAI-compatible client or anything with a `base_url`).

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One non-streaming chat completion request/response round trip. Streaming
/// is handled separately by the caller for the first turn; once the router
/// loop is driving tool calls it always uses this non-streaming form.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: Value) -> Result<Value>;
}
