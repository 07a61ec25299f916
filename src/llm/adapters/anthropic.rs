//! Anthropic Messages API adapter.
//!
//! Streaming uses SSE: each `data:` line carries a typed event
//! (`message_start`, `content_block_delta`, `message_delta`, `message_stop`);
//! other SSE lines (`event:`, comments) carry no payload.

use serde_json::{json, Value};

use super::{sse_data, AdapterRequest, ProtocolAdapter, ProviderResponse, Role, StreamChunk, ToolCall};
use crate::llm::config::{EndpointConfig, Protocol};
use crate::llm::error::ProviderError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter;

impl ProtocolAdapter for AnthropicAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Anthropic
    }

    fn request_url(&self, endpoint: &EndpointConfig, _model: &str, _stream: bool) -> String {
        let base = endpoint.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/v1/messages", base.trim_end_matches('/'))
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
            ("x-api-key".to_string(), key),
            ("anthropic-version".to_string(), API_VERSION.to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ])
    }

    fn build_body(&self, model: &str, request: &AdapterRequest) -> Value {
        // System messages ride in the dedicated `system` field.
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
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
        let blocks = body["content"]
            .as_array()
            .ok_or_else(|| ProviderError::Parse("missing content array".to_string()))?;

        let mut content = String::new();
        let mut thinking = String::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => content.push_str(block["text"].as_str().unwrap_or_default()),
                Some("thinking") => {
                    thinking.push_str(block["thinking"].as_str().unwrap_or_default());
                }
                Some("tool_use") => tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                }),
                _ => {}
            }
        }

        let input_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(ProviderResponse {
            content,
            tokens_used: input_tokens + output_tokens,
            model: body["model"].as_str().unwrap_or_default().to_string(),
            finish_reason: body["stop_reason"].as_str().map(String::from),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            thinking: if thinking.is_empty() {
                None
            } else {
                Some(thinking)
            },
        })
    }

    fn parse_stream_line(&self, line: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(data)
            .map_err(|e| ProviderError::Parse(format!("bad SSE payload: {e}")))?;

        match value["type"].as_str() {
            Some("content_block_delta") => {
                let delta = &value["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => Ok(Some(StreamChunk {
                        content: delta["text"].as_str().map(String::from),
                        ..StreamChunk::default()
                    })),
                    Some("thinking_delta") => Ok(Some(StreamChunk {
                        thinking: delta["thinking"].as_str().map(String::from),
                        ..StreamChunk::default()
                    })),
                    _ => Ok(None),
                }
            }
            Some("message_delta") => Ok(Some(StreamChunk {
                finish_reason: value["delta"]["stop_reason"].as_str().map(String::from),
                tokens_used: value["usage"]["output_tokens"].as_u64(),
                ..StreamChunk::default()
            })),
            Some("message_stop") => Ok(Some(StreamChunk {
                done: true,
                ..StreamChunk::default()
            })),
            Some("error") => Err(ProviderError::Server(
                529,
                value["error"]["message"]
                    .as_str()
                    .unwrap_or("stream error")
                    .to_string(),
            )),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_body_splits_system_messages() {
        let request = AdapterRequest {
            messages: vec![
                super::super::ChatMessage::system("be terse"),
                super::super::ChatMessage::user("hi"),
            ],
            max_tokens: 100,
            temperature: 0.2,
            tools: None,
            tool_choice: None,
            stream: false,
        };
        let body = AnthropicAdapter.build_body("claude-test", &request);
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_parse_response() {
        let body = serde_json::json!({
            "model": "claude-test",
            "stop_reason": "end_turn",
            "content": [{"type": "text", "text": "hello"}],
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let response = AnthropicAdapter.parse_response(&body).unwrap();
        assert_eq!(response.content, "hello");
        assert_eq!(response.tokens_used, 15);
        assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn test_parse_tool_use_block() {
        let body = serde_json::json!({
            "model": "claude-test",
            "stop_reason": "tool_use",
            "content": [
                {"type": "tool_use", "id": "t1", "name": "search", "input": {"q": "rust"}}
            ],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        });
        let response = AnthropicAdapter.parse_response(&body).unwrap();
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].name, "search");
        assert_eq!(calls[0].arguments["q"], "rust");
    }

    #[test]
    fn test_stream_text_delta() {
        let chunk = AnthropicAdapter
            .parse_stream_line(
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            )
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert!(!chunk.done);
    }

    #[test]
    fn test_stream_message_stop() {
        let chunk = AnthropicAdapter
            .parse_stream_line(r#"data: {"type":"message_stop"}"#)
            .unwrap()
            .unwrap();
        assert!(chunk.done);
    }

    #[test]
    fn test_stream_ignores_event_lines() {
        assert!(AnthropicAdapter
            .parse_stream_line("event: content_block_delta")
            .unwrap()
            .is_none());
    }
}
