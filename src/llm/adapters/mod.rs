//! Protocol adapters: translate generic chat requests to and from each
//! vendor's wire shape.
//!
//! An adapter is a pure strategy: it builds URLs, headers, and bodies, and
//! parses responses and stream lines. It never performs I/O; the provider
//! manager owns the HTTP client and the retry/fallback policy.

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub mod openai;
mod sigv4;

use serde::{Deserialize, Serialize};

use crate::llm::config::{EndpointConfig, Protocol};
use crate::llm::error::ProviderError;

pub use anthropic::AnthropicAdapter;
pub use bedrock::BedrockAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// Chat role, vendor-neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The generic request an adapter translates.
#[derive(Debug, Clone)]
pub struct AdapterRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tools: Option<serde_json::Value>,
    pub tool_choice: Option<serde_json::Value>,
    pub stream: bool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A parsed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
    pub finish_reason: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub thinking: Option<String>,
}

/// One parsed streaming increment.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub done: bool,
    pub finish_reason: Option<String>,
    pub tokens_used: Option<u64>,
}

/// Strategy translating generic requests to one vendor's shape.
pub trait ProtocolAdapter: Send + Sync {
    fn protocol(&self) -> Protocol;

    /// Full request URL for a model on an endpoint.
    fn request_url(&self, endpoint: &EndpointConfig, model: &str, stream: bool) -> String;

    /// Auth and content headers. `body` and `url` are inputs for protocols
    /// that sign the request (bedrock).
    fn request_headers(
        &self,
        endpoint_id: &str,
        endpoint: &EndpointConfig,
        url: &str,
        body: &[u8],
    ) -> Result<Vec<(String, String)>, ProviderError>;

    /// Provider-native request body.
    fn build_body(&self, model: &str, request: &AdapterRequest) -> serde_json::Value;

    /// Parse a non-streaming response body.
    fn parse_response(&self, body: &serde_json::Value) -> Result<ProviderResponse, ProviderError>;

    /// Whether the adapter can consume a line-based stream.
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Parse one complete line of a streaming response into zero or one
    /// chunk. Lines that carry no payload (SSE event names, keep-alives)
    /// yield `None`.
    fn parse_stream_line(&self, line: &str) -> Result<Option<StreamChunk>, ProviderError>;
}

/// The adapter for a protocol.
pub fn adapter_for(protocol: Protocol) -> Box<dyn ProtocolAdapter> {
    match protocol {
        Protocol::Anthropic => Box::new(AnthropicAdapter),
        Protocol::Openai => Box::new(OpenAiAdapter),
        Protocol::Gemini => Box::new(GeminiAdapter),
        Protocol::Bedrock => Box::new(BedrockAdapter),
    }
}

/// Strip an SSE `data:` prefix, returning the payload if this is a data line.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data:").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_data_extraction() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("event: message_start"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn test_adapter_for_covers_all_protocols() {
        for protocol in [
            Protocol::Anthropic,
            Protocol::Openai,
            Protocol::Gemini,
            Protocol::Bedrock,
        ] {
            assert_eq!(adapter_for(protocol).protocol(), protocol);
        }
    }
}
