//! LLM provider layer: model routing, endpoint selection, fallback, and
//! streaming.
//!
//! The manager resolves a target (agent, tier, or explicit model) to a
//! deduplicated fallback chain, then walks `chain × endpoints` until one
//! attempt succeeds. Recoverable failures (429, 5xx, timeout, network) mark
//! the endpoint unhealthy for a cool-off window and rotation continues;
//! non-recoverable failures abort immediately.

pub mod adapters;
pub mod config;
pub mod endpoint_health;
pub mod error;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EventPayload;
use crate::domain::ports::{LlmReviewer, ReviewVerdict};
use crate::services::event_bus::EventBus;
use crate::services::model_selector::ModelTier;
use crate::services::scheduler::TierResolver;

pub use adapters::{ChatMessage, ProviderResponse, Role, StreamChunk, ToolCall};
pub use config::{EndpointConfig, LlmConfig, ModelConfig, Protocol};
pub use error::ProviderError;

use adapters::{adapter_for, AdapterRequest, ProtocolAdapter};
use endpoint_health::EndpointHealth;

/// What to complete against.
#[derive(Debug, Clone)]
pub enum ModelTarget {
    Agent(String),
    Tier(ModelTier),
    Model(String),
}

/// Per-call options; unset fields take the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Option<serde_json::Value>,
    pub tool_choice: Option<serde_json::Value>,
    pub stream: bool,
    pub timeout: Option<Duration>,
    /// Correlation ids stamped onto stream events.
    pub goal_id: Option<Uuid>,
    pub work_item_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
}

/// Callback invoked for each streamed chunk.
pub type ChunkCallback = Arc<dyn Fn(&StreamChunk) + Send + Sync>;

/// Routes completions across models and endpoints.
pub struct ProviderManager {
    http: reqwest::Client,
    config: RwLock<LlmConfig>,
    health: EndpointHealth,
    event_bus: Arc<EventBus>,
}

impl ProviderManager {
    pub fn new(config: LlmConfig, event_bus: Arc<EventBus>) -> Self {
        let cool_off = Duration::from_millis(config.defaults.endpoint_cool_off_ms);
        Self {
            http: reqwest::Client::new(),
            config: RwLock::new(config),
            health: EndpointHealth::new(cool_off),
            event_bus,
        }
    }

    /// Swap in a new configuration (hot reload).
    pub fn reload(&self, config: LlmConfig) {
        if let Ok(mut current) = self.config.write() {
            *current = config;
        }
    }

    fn config_snapshot(&self) -> LlmConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Rough dollar cost for a token count on a model (blended in/out rate).
    pub fn estimate_cost(&self, model: &str, tokens: u64) -> f64 {
        let config = self.config_snapshot();
        config.models.get(model).map_or(0.0, |m| {
            let per_1k = (m.cost_per_1k_tokens.input + m.cost_per_1k_tokens.output) / 2.0;
            per_1k * tokens as f64 / 1000.0
        })
    }

    /// The deduplicated model chain for a target.
    pub fn fallback_chain(&self, target: &ModelTarget) -> Vec<String> {
        let config = self.config_snapshot();
        match target {
            ModelTarget::Agent(agent_id) => config.fallback_chain_for_agent(agent_id),
            ModelTarget::Tier(tier) => config.fallback_chain_for_tier(*tier),
            ModelTarget::Model(model) => vec![model.clone()],
        }
    }

    /// Produce a completion, walking the fallback chain.
    pub async fn complete(
        &self,
        target: &ModelTarget,
        messages: Vec<ChatMessage>,
        options: CompletionOptions,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<ProviderResponse, ProviderError> {
        let config = self.config_snapshot();
        let chain = self.fallback_chain(target);
        if chain.is_empty() {
            return Err(ProviderError::UnknownModel(format!("{target:?}")));
        }

        let request = AdapterRequest {
            messages,
            max_tokens: options.max_tokens.unwrap_or(config.defaults.max_tokens),
            temperature: options.temperature.unwrap_or(config.defaults.temperature),
            tools: options.tools.clone(),
            tool_choice: options.tool_choice.clone(),
            stream: options.stream,
        };
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_millis(config.defaults.timeout_ms));

        let mut last_error: Option<ProviderError> = None;
        for model in &chain {
            let candidates: Vec<_> = config
                .candidate_endpoints(model)
                .into_iter()
                .filter(|(id, _)| self.health.is_healthy(id))
                .collect();
            if candidates.is_empty() {
                last_error = Some(ProviderError::NoEndpoints(model.clone()));
                continue;
            }

            for (endpoint_id, endpoint) in candidates {
                let adapter = adapter_for(endpoint.protocol);
                debug!(
                    model = model.as_str(),
                    endpoint = endpoint_id.as_str(),
                    "attempting completion"
                );
                match self
                    .attempt(
                        adapter.as_ref(),
                        &endpoint_id,
                        endpoint,
                        model,
                        &request,
                        timeout,
                        &options,
                        on_chunk.as_ref(),
                    )
                    .await
                {
                    Ok(response) => return Ok(response),
                    Err(err) if !err.is_recoverable() => return Err(err),
                    Err(err) => {
                        warn!(
                            model = model.as_str(),
                            endpoint = endpoint_id.as_str(),
                            error = %err,
                            "endpoint failed, rotating"
                        );
                        self.health.mark_unhealthy(&endpoint_id);
                        last_error = Some(err);
                    }
                }
            }
        }

        Err(ProviderError::Exhausted {
            last: last_error
                .map_or_else(|| "no endpoints tried".to_string(), |e| e.to_string()),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        adapter: &dyn ProtocolAdapter,
        endpoint_id: &str,
        endpoint: &EndpointConfig,
        model: &str,
        request: &AdapterRequest,
        timeout: Duration,
        options: &CompletionOptions,
        on_chunk: Option<&ChunkCallback>,
    ) -> Result<ProviderResponse, ProviderError> {
        let streaming = request.stream && adapter.supports_streaming();
        let effective = AdapterRequest {
            stream: streaming,
            ..request.clone()
        };

        let url = adapter.request_url(endpoint, model, streaming);
        let body = serde_json::to_vec(&adapter.build_body(model, &effective))
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        let headers = adapter.request_headers(endpoint_id, endpoint, &url, &body)?;

        let mut builder = self.http.post(&url).timeout(timeout).body(body);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        if streaming {
            self.consume_stream(adapter, model, response, options, on_chunk)
                .await
        } else {
            let value: serde_json::Value = response.json().await?;
            let parsed = adapter.parse_response(&value)?;
            // A caller that asked for streaming against a non-streaming
            // protocol still gets its chunk callback and events, once.
            if request.stream {
                self.emit_buffered_as_stream(&parsed, model, options, on_chunk);
            }
            Ok(parsed)
        }
    }

    async fn consume_stream(
        &self,
        adapter: &dyn ProtocolAdapter,
        model: &str,
        response: reqwest::Response,
        options: &CompletionOptions,
        on_chunk: Option<&ChunkCallback>,
    ) -> Result<ProviderResponse, ProviderError> {
        let request_id = Uuid::new_v4();
        self.event_bus.publish(EventPayload::LlmStreamStart {
            request_id,
            goal_id: options.goal_id,
            work_item_id: options.work_item_id,
            run_id: options.run_id,
            model: model.to_string(),
        });

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut index: u64 = 0;
        let mut tokens_used: u64 = 0;
        let mut finish_reason: Option<String> = None;
        let mut done = false;

        'outer: while let Some(piece) = stream.next().await {
            let bytes = match piece {
                Ok(bytes) => bytes,
                Err(err) => {
                    let provider_err = ProviderError::from(err);
                    self.event_bus.publish(EventPayload::LlmStreamError {
                        request_id,
                        error: provider_err.to_string(),
                    });
                    return Err(provider_err);
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                match self.process_stream_line(
                    adapter,
                    line.trim_end(),
                    request_id,
                    options,
                    on_chunk,
                    &mut content,
                    &mut index,
                    &mut tokens_used,
                    &mut finish_reason,
                ) {
                    Ok(line_done) => {
                        if line_done {
                            done = true;
                            break 'outer;
                        }
                    }
                    Err(err) => {
                        self.event_bus.publish(EventPayload::LlmStreamError {
                            request_id,
                            error: err.to_string(),
                        });
                        return Err(err);
                    }
                }
            }
        }

        if !done && !buffer.trim().is_empty() {
            // Trailing line without a newline.
            let line = std::mem::take(&mut buffer);
            let _ = self.process_stream_line(
                adapter,
                line.trim_end(),
                request_id,
                options,
                on_chunk,
                &mut content,
                &mut index,
                &mut tokens_used,
                &mut finish_reason,
            )?;
        }

        self.event_bus.publish(EventPayload::LlmStreamEnd {
            request_id,
            total_chunks: index,
            tokens_used,
            finish_reason: finish_reason.clone(),
        });

        Ok(ProviderResponse {
            content,
            tokens_used,
            model: model.to_string(),
            finish_reason,
            tool_calls: None,
            thinking: None,
        })
    }

    /// Handle one stream line; returns true when the stream is finished.
    #[allow(clippy::too_many_arguments)]
    fn process_stream_line(
        &self,
        adapter: &dyn ProtocolAdapter,
        line: &str,
        request_id: Uuid,
        options: &CompletionOptions,
        on_chunk: Option<&ChunkCallback>,
        content: &mut String,
        index: &mut u64,
        tokens_used: &mut u64,
        finish_reason: &mut Option<String>,
    ) -> Result<bool, ProviderError> {
        let Some(chunk) = adapter.parse_stream_line(line)? else {
            return Ok(false);
        };
        if let Some(tokens) = chunk.tokens_used {
            *tokens_used = tokens;
        }
        if let Some(reason) = &chunk.finish_reason {
            *finish_reason = Some(reason.clone());
        }
        if let Some(text) = &chunk.content {
            content.push_str(text);
            self.event_bus.publish(EventPayload::LlmStreamChunk {
                request_id,
                goal_id: options.goal_id,
                work_item_id: options.work_item_id,
                run_id: options.run_id,
                content: text.clone(),
                index: *index,
            });
            *index += 1;
        }
        if let Some(callback) = on_chunk {
            callback(&chunk);
        }
        Ok(chunk.done)
    }

    fn emit_buffered_as_stream(
        &self,
        response: &ProviderResponse,
        model: &str,
        options: &CompletionOptions,
        on_chunk: Option<&ChunkCallback>,
    ) {
        let request_id = Uuid::new_v4();
        self.event_bus.publish(EventPayload::LlmStreamStart {
            request_id,
            goal_id: options.goal_id,
            work_item_id: options.work_item_id,
            run_id: options.run_id,
            model: model.to_string(),
        });
        self.event_bus.publish(EventPayload::LlmStreamChunk {
            request_id,
            goal_id: options.goal_id,
            work_item_id: options.work_item_id,
            run_id: options.run_id,
            content: response.content.clone(),
            index: 0,
        });
        let chunk = StreamChunk {
            content: Some(response.content.clone()),
            done: true,
            finish_reason: response.finish_reason.clone(),
            tokens_used: Some(response.tokens_used),
            ..StreamChunk::default()
        };
        if let Some(callback) = on_chunk {
            callback(&chunk);
        }
        self.event_bus.publish(EventPayload::LlmStreamEnd {
            request_id,
            total_chunks: 1,
            tokens_used: response.tokens_used,
            finish_reason: response.finish_reason.clone(),
        });
    }
}

impl TierResolver for ProviderManager {
    fn model_for_tier(&self, tier: ModelTier) -> String {
        let config = self.config_snapshot();
        let primary = &config.tiers.for_tier(tier).primary;
        if primary.is_empty() {
            tier.as_str().to_string()
        } else {
            primary.clone()
        }
    }
}

/// LLM-backed review gate: asks a model for the literal verdict shape and
/// fails closed on unparseable answers.
pub struct ProviderReviewer {
    manager: Arc<ProviderManager>,
    target: ModelTarget,
}

impl ProviderReviewer {
    pub fn new(manager: Arc<ProviderManager>) -> Self {
        Self {
            manager,
            target: ModelTarget::Tier(ModelTier::Medium),
        }
    }

    pub fn with_target(mut self, target: ModelTarget) -> Self {
        self.target = target;
        self
    }
}

#[async_trait]
impl LlmReviewer for ProviderReviewer {
    async fn review(&self, prompt: &str, context: Option<&str>) -> DomainResult<ReviewVerdict> {
        let mut user = prompt.to_string();
        if let Some(context) = context {
            user.push_str("\n\nContext:\n");
            user.push_str(context);
        }
        let messages = vec![
            ChatMessage::system(
                "You are a strict verification reviewer. Respond with exactly one JSON object \
                 of the shape {\"passed\": boolean, \"reasoning\": string} and nothing else.",
            ),
            ChatMessage::user(user),
        ];
        let response = self
            .manager
            .complete(&self.target, messages, CompletionOptions::default(), None)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
        Ok(ReviewVerdict::from_llm_output(&response.content))
    }
}
