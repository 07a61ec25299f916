//! AWS Bedrock adapter (anthropic-on-bedrock).
//!
//! Request bodies use the anthropic messages shape with an
//! `anthropic_version` marker instead of a `model` field (the model rides in
//! the URL); requests are SigV4-signed. Bedrock's response stream is a
//! binary event stream rather than SSE, so this adapter opts out of
//! line-based streaming and the manager falls back to buffered completions.

use serde_json::{json, Value};

use super::{anthropic::AnthropicAdapter, sigv4, AdapterRequest, ProtocolAdapter, ProviderResponse, StreamChunk};
use crate::llm::config::{EndpointConfig, Protocol};
use crate::llm::error::ProviderError;

const BEDROCK_ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const DEFAULT_REGION: &str = "us-east-1";

pub struct BedrockAdapter;

impl ProtocolAdapter for BedrockAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Bedrock
    }

    fn request_url(&self, endpoint: &EndpointConfig, model: &str, _stream: bool) -> String {
        let region = endpoint.region.as_deref().unwrap_or(DEFAULT_REGION);
        match endpoint.base_url.as_deref() {
            Some(base) => format!("{}/model/{model}/invoke", base.trim_end_matches('/')),
            None => format!("https://bedrock-runtime.{region}.amazonaws.com/model/{model}/invoke"),
        }
    }

    fn request_headers(
        &self,
        endpoint_id: &str,
        endpoint: &EndpointConfig,
        url: &str,
        body: &[u8],
    ) -> Result<Vec<(String, String)>, ProviderError> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| ProviderError::MissingCredentials(endpoint_id.to_string()))?;
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| ProviderError::MissingCredentials(endpoint_id.to_string()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        sigv4::sign(&sigv4::SigningParams {
            access_key: &access_key,
            secret_key: &secret_key,
            session_token: session_token.as_deref(),
            region: endpoint.region.as_deref().unwrap_or(DEFAULT_REGION),
            service: "bedrock",
            method: "POST",
            url,
            body,
            now: chrono::Utc::now(),
        })
    }

    fn build_body(&self, model: &str, request: &AdapterRequest) -> Value {
        // Same shape as the anthropic adapter, minus the model, plus the
        // bedrock version marker; streaming is not requested in-body.
        let mut body = AnthropicAdapter.build_body(model, request);
        if let Some(map) = body.as_object_mut() {
            map.remove("model");
            map.remove("stream");
            map.insert(
                "anthropic_version".to_string(),
                json!(BEDROCK_ANTHROPIC_VERSION),
            );
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Result<ProviderResponse, ProviderError> {
        AnthropicAdapter.parse_response(body)
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    fn parse_stream_line(&self, _line: &str) -> Result<Option<StreamChunk>, ProviderError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::adapters::ChatMessage;

    fn endpoint(region: Option<&str>) -> EndpointConfig {
        EndpointConfig {
            enabled: true,
            protocol: Protocol::Bedrock,
            base_url: None,
            priority: 0,
            region: region.map(String::from),
            cost_multiplier: None,
            api_key: None,
            api_key_env: None,
            azure: false,
        }
    }

    #[test]
    fn test_url_includes_region_and_model() {
        let url = BedrockAdapter.request_url(&endpoint(Some("eu-west-1")), "anthropic.claude-test", false);
        assert_eq!(
            url,
            "https://bedrock-runtime.eu-west-1.amazonaws.com/model/anthropic.claude-test/invoke"
        );
    }

    #[test]
    fn test_body_swaps_model_for_version_marker() {
        let request = AdapterRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 10,
            temperature: 0.0,
            tools: None,
            tool_choice: None,
            stream: true,
        };
        let body = BedrockAdapter.build_body("anthropic.claude-test", &request);
        assert!(body.get("model").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["anthropic_version"], BEDROCK_ANTHROPIC_VERSION);
    }

    #[test]
    fn test_streaming_unsupported() {
        assert!(!BedrockAdapter.supports_streaming());
    }
}
