//! Provider fallback and streaming behavior against mock HTTP endpoints.

use std::sync::{Arc, Mutex};

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use foreman::llm::config::{
    CostPer1kTokens, EndpointConfig, LlmConfig, ModelConfig, Protocol, TierModels,
};
use foreman::llm::{ChatMessage, CompletionOptions, ModelTarget, ProviderError, ProviderManager};
use foreman::services::model_selector::ModelTier;
use foreman::services::{EventBus, EventBusConfig};

fn endpoint(base_url: &str) -> EndpointConfig {
    EndpointConfig {
        enabled: true,
        protocol: Protocol::Anthropic,
        base_url: Some(base_url.to_string()),
        priority: 0,
        region: None,
        cost_multiplier: None,
        api_key: Some("test-key".to_string()),
        api_key_env: None,
        azure: false,
    }
}

fn model(endpoints: &[&str]) -> ModelConfig {
    ModelConfig {
        display_name: "test model".to_string(),
        endpoints: endpoints.iter().map(ToString::to_string).collect(),
        cost_per_1k_tokens: CostPer1kTokens {
            input: 1.0,
            output: 2.0,
        },
        max_context_tokens: None,
        capabilities: Vec::new(),
    }
}

fn two_model_config(url_a: &str, url_b: &str) -> LlmConfig {
    let mut config = LlmConfig::default();
    config.endpoints.insert("ep-a".into(), endpoint(url_a));
    config.endpoints.insert("ep-b".into(), endpoint(url_b));
    config.models.insert("model-a".into(), model(&["ep-a"]));
    config.models.insert("model-b".into(), model(&["ep-b"]));
    config.tiers.complex = TierModels {
        primary: "model-a".into(),
        fallback: vec!["model-b".into()],
    };
    config
}

fn anthropic_ok(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "model": "model-b",
        "stop_reason": "end_turn",
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 5, "output_tokens": 7}
    }))
}

// ----------------------------------------------------------------------------
// S4 — fallback on 5xx, endpoint cool-off
// ----------------------------------------------------------------------------

#[tokio::test]
async fn server_error_rotates_to_fallback_model() {
    let mock_a = MockServer::start().await;
    let mock_b = MockServer::start().await;

    // The failing endpoint is hit exactly once across both completions:
    // the cool-off keeps it out of rotation for the second call.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .expect(1)
        .mount(&mock_a)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(anthropic_ok("fallback says hi"))
        .expect(2)
        .mount(&mock_b)
        .await;

    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let manager = ProviderManager::new(two_model_config(&mock_a.uri(), &mock_b.uri()), bus);

    for _ in 0..2 {
        let response = manager
            .complete(
                &ModelTarget::Tier(ModelTier::Complex),
                vec![ChatMessage::user("hello")],
                CompletionOptions::default(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(response.content, "fallback says hi");
        assert_eq!(response.tokens_used, 12);
    }
}

#[tokio::test]
async fn non_recoverable_error_aborts_without_fallback() {
    let mock_a = MockServer::start().await;
    let mock_b = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&mock_a)
        .await;
    // The fallback must never be consulted for a 4xx.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(anthropic_ok("unused"))
        .expect(0)
        .mount(&mock_b)
        .await;

    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let manager = ProviderManager::new(two_model_config(&mock_a.uri(), &mock_b.uri()), bus);

    let error = manager
        .complete(
            &ModelTarget::Tier(ModelTier::Complex),
            vec![ChatMessage::user("hello")],
            CompletionOptions::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(error, ProviderError::InvalidRequest(_)));
}

#[tokio::test]
async fn exhausted_chain_reports_last_error() {
    let mock_a = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_a)
        .await;

    let mut config = LlmConfig::default();
    config.endpoints.insert("ep-a".into(), endpoint(&mock_a.uri()));
    config.models.insert("model-a".into(), model(&["ep-a"]));
    config.tiers.complex = TierModels {
        primary: "model-a".into(),
        fallback: Vec::new(),
    };

    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let manager = ProviderManager::new(config, bus);

    let error = manager
        .complete(
            &ModelTarget::Tier(ModelTier::Complex),
            vec![ChatMessage::user("hello")],
            CompletionOptions::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(error, ProviderError::Exhausted { .. }));
}

// ----------------------------------------------------------------------------
// Streaming
// ----------------------------------------------------------------------------

#[tokio::test]
async fn streaming_accumulates_chunks_and_emits_events() {
    let mock = MockServer::start().await;
    let sse_body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n",
        "\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n",
        "\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":12}}\n",
        "\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n",
        "\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body, "text/event-stream"))
        .mount(&mock)
        .await;

    let mut config = LlmConfig::default();
    config.endpoints.insert("ep".into(), endpoint(&mock.uri()));
    config.models.insert("model-s".into(), model(&["ep"]));
    config.tiers.medium = TierModels {
        primary: "model-s".into(),
        fallback: Vec::new(),
    };

    let bus = Arc::new(EventBus::new(EventBusConfig::default()));
    let mut rx = bus.subscribe();
    let manager = ProviderManager::new(config, bus);

    let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = chunks.clone();
    let response = manager
        .complete(
            &ModelTarget::Tier(ModelTier::Medium),
            vec![ChatMessage::user("hello")],
            CompletionOptions {
                stream: true,
                ..CompletionOptions::default()
            },
            Some(Arc::new(move |chunk| {
                if let Some(text) = &chunk.content {
                    if let Ok(mut chunks) = sink.lock() {
                        chunks.push(text.clone());
                    }
                }
            })),
        )
        .await
        .unwrap();

    assert_eq!(response.content, "Hello");
    assert_eq!(response.tokens_used, 12);
    assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
    assert_eq!(*chunks.lock().unwrap(), vec!["Hel".to_string(), "lo".to_string()]);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.payload.event_type().to_string());
    }
    assert_eq!(
        events,
        vec![
            "llm.stream.start",
            "llm.stream.chunk",
            "llm.stream.chunk",
            "llm.stream.end",
        ]
    );
}
