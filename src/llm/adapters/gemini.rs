//! Google Gemini adapter.
//!
//! Uses `generateContent` / `streamGenerateContent?alt=sse`; auth rides in
//! the `x-goog-api-key` header. Gemini has no system role: system messages
//! become the `systemInstruction` field, assistant turns use role `model`.

use serde_json::{json, Value};

use super::{sse_data, AdapterRequest, ProtocolAdapter, ProviderResponse, Role, StreamChunk, ToolCall};
use crate::llm::config::{EndpointConfig, Protocol};
use crate::llm::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiAdapter;

impl ProtocolAdapter for GeminiAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Gemini
    }

    fn request_url(&self, endpoint: &EndpointConfig, model: &str, stream: bool) -> String {
        let base = endpoint.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        let verb = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!("{}/models/{model}:{verb}", base.trim_end_matches('/'))
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
        Ok(vec![
            ("x-goog-api-key".to_string(), key),
            ("content-type".to_string(), "application/json".to_string()),
        ])
    }

    fn build_body(&self, _model: &str, request: &AdapterRequest) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    },
                    "parts": [{"text": m.content}],
                })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
        }
        if let Some(tools) = &request.tools {
            body["tools"] = tools.clone();
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, ProviderError> {
        let candidate = body["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ProviderError::Parse("missing candidates".to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = candidate["content"]["parts"].as_array() {
            for part in parts {
                if let Some(text) = part["text"].as_str() {
                    content.push_str(text);
                }
                if let Some(call) = part.get("functionCall") {
                    tool_calls.push(ToolCall {
                        id: format!("call-{}", tool_calls.len()),
                        name: call["name"].as_str().unwrap_or_default().to_string(),
                        arguments: call["args"].clone(),
                    });
                }
            }
        }

        Ok(ProviderResponse {
            content,
            tokens_used: body["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0),
            model: body["modelVersion"].as_str().unwrap_or_default().to_string(),
            finish_reason: candidate["finishReason"].as_str().map(String::from),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            thinking: None,
        })
    }

    fn parse_stream_line(&self, line: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::Parse(format!("bad SSE payload: {e}")))?;
        let Some(candidate) = value["candidates"].as_array().and_then(|c| c.first()) else {
            return Ok(None);
        };
        let text = candidate["content"]["parts"]
            .as_array()
            .and_then(|parts| parts.first())
            .and_then(|p| p["text"].as_str())
            .map(String::from);
        let finish_reason = candidate["finishReason"].as_str().map(String::from);
        Ok(Some(StreamChunk {
            content: text,
            done: finish_reason.is_some(),
            finish_reason,
            tokens_used: value["usageMetadata"]["totalTokenCount"].as_u64(),
            ..StreamChunk::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::adapters::ChatMessage;

    fn endpoint() -> EndpointConfig {
        EndpointConfig {
            enabled: true,
            protocol: Protocol::Gemini,
            base_url: None,
            priority: 0,
            region: None,
            cost_multiplier: None,
            api_key: Some("g-key".into()),
            api_key_env: None,
            azure: false,
        }
    }

    #[test]
    fn test_stream_url_uses_sse_alt() {
        let url = GeminiAdapter.request_url(&endpoint(), "gemini-test", true);
        assert!(url.ends_with("models/gemini-test:streamGenerateContent?alt=sse"));
    }

    #[test]
    fn test_assistant_role_becomes_model() {
        let request = AdapterRequest {
            messages: vec![ChatMessage::assistant("earlier"), ChatMessage::user("now")],
            max_tokens: 10,
            temperature: 0.0,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let body = GeminiAdapter.build_body("gemini-test", &request);
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
    }

    #[test]
    fn test_parse_response() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "hello"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 12}
        });
        let response = GeminiAdapter.parse_response(&body).unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.tokens_used, 12);
    }
}
