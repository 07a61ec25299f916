//! OpenAI chat-completions adapter.
//!
//! Also covers Azure OpenAI deployments: the endpoint sets `azure = true`
//! and the key is sent as an `api-key` header instead of a bearer token.

use serde_json::{json, Value};

use super::{sse_data, AdapterRequest, ProtocolAdapter, ProviderResponse, Role, StreamChunk, ToolCall};
use crate::llm::config::{EndpointConfig, Protocol};
use crate::llm::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter;

impl ProtocolAdapter for OpenAiAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Openai
    }

    fn request_url(&self, endpoint: &EndpointConfig, _model: &str, _stream: bool) -> String {
        let base = endpoint.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn request_headers(
        &self,
        endpoint_id: &str,
        endpoint: &EndpointConfig,
        _url: &str,
        _body: &[u8],
    ) -> Result<Vec<(String, String)>, ProviderError> {
        let key = endpoint
            .resolve_api_key()
            .ok_or_else(|| ProviderError::MissingCredentials(endpoint_id.to_string()))?;
        let auth = if endpoint.azure {
            ("api-key".to_string(), key)
        } else {
            ("authorization".to_string(), format!("Bearer {key}"))
        };
        Ok(vec![
            auth,
            ("content-type".to_string(), "application/json".to_string()),
        ])
    }

    fn build_body(&self, model: &str, request: &AdapterRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if let Some(tools) = &request.tools {
            body["tools"] = tools.clone();
        }
        if let Some(tool_choice) = &request.tool_choice {
            body["tool_choice"] = tool_choice.clone();
        }
        if request.stream {
            body["stream"] = json!(true);
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, ProviderError> {
        let choice = body["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ProviderError::Parse("missing choices".to_string()))?;
        let message = &choice["message"];

        let tool_calls = message["tool_calls"].as_array().map(|calls| {
            calls
                .iter()
                .map(|c| ToolCall {
                    id: c["id"].as_str().unwrap_or_default().to_string(),
                    name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                    arguments: c["function"]["arguments"]
                        .as_str()
                        .and_then(|a| serde_json::from_str(a).ok())
                        .unwrap_or(Value::Null),
                })
                .collect::<Vec<_>>()
        });

        Ok(ProviderResponse {
            content: message["content"].as_str().unwrap_or_default().to_string(),
            tokens_used: body["usage"]["total_tokens"].as_u64().unwrap_or(0),
            model: body["model"].as_str().unwrap_or_default().to_string(),
            finish_reason: choice["finish_reason"].as_str().map(String::from),
            tool_calls,
            thinking: None,
        })
    }

    fn parse_stream_line(&self, line: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        if data == "[DONE]" {
            return Ok(Some(StreamChunk {
                done: true,
                ..StreamChunk::default()
            }));
        }
        let value: Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::Parse(format!("bad SSE payload: {e}")))?;
        let Some(choice) = value["choices"].as_array().and_then(|c| c.first()) else {
            return Ok(None);
        };
        Ok(Some(StreamChunk {
            content: choice["delta"]["content"].as_str().map(String::from),
            finish_reason: choice["finish_reason"].as_str().map(String::from),
            tokens_used: value["usage"]["total_tokens"].as_u64(),
            ..StreamChunk::default()
        }))
    }
}
