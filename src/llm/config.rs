//! LLM layer configuration: endpoints, models, tiers, agents, defaults.
//!
//! Loaded at startup and hot-reloadable by value swap: the provider manager
//! keeps the whole table behind a lock and replaces it atomically.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::services::model_selector::ModelTier;

/// Wire protocol an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Anthropic,
    Openai,
    Gemini,
    Bedrock,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Gemini => "gemini",
            Self::Bedrock => "bedrock",
        }
    }
}

/// One concrete network endpoint with credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub protocol: Protocol,
    /// Base URL override; protocol default when absent.
    pub base_url: Option<String>,
    /// Lower tries first.
    #[serde(default)]
    pub priority: u32,
    /// AWS region for bedrock endpoints.
    pub region: Option<String>,
    /// Relative cost multiplier for this endpoint.
    pub cost_multiplier: Option<f64>,
    /// Inline API key. Prefer `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Azure-style auth: `api-key` header instead of a bearer token.
    #[serde(default)]
    pub azure: bool,
}

fn default_enabled() -> bool {
    true
}

impl EndpointConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }

    /// Whether usable credentials are present.
    pub fn has_credentials(&self) -> bool {
        match self.protocol {
            Protocol::Bedrock => {
                std::env::var("AWS_ACCESS_KEY_ID").is_ok()
                    && std::env::var("AWS_SECRET_ACCESS_KEY").is_ok()
            }
            _ => self.resolve_api_key().is_some(),
        }
    }
}

/// Per-1k-token pricing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostPer1kTokens {
    #[serde(default)]
    pub input: f64,
    #[serde(default)]
    pub output: f64,
}

/// A model and the endpoints able to serve it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub display_name: String,
    /// Endpoint ids, tried in endpoint-priority order.
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub cost_per_1k_tokens: CostPer1kTokens,
    pub max_context_tokens: Option<u32>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Primary model plus ordered fallbacks for one tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierModels {
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub fallback: Vec<String>,
}

/// The tier table resolving abstract tiers to models.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default)]
    pub simple: TierModels,
    #[serde(default)]
    pub medium: TierModels,
    #[serde(default)]
    pub complex: TierModels,
}

impl TierTable {
    pub fn for_tier(&self, tier: ModelTier) -> &TierModels {
        match tier {
            ModelTier::Simple => &self.simple,
            ModelTier::Medium => &self.medium,
            ModelTier::Complex => &self.complex,
        }
    }
}

/// Per-agent routing override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentModelConfig {
    pub tier: Option<ModelTier>,
    pub primary: Option<String>,
    pub fallback: Option<Vec<String>>,
}

/// Request defaults applied when the caller leaves a field unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmDefaults {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// How long a failed endpoint stays out of rotation.
    #[serde(default = "default_cool_off_ms")]
    pub endpoint_cool_off_ms: u64,
}

fn default_timeout_ms() -> u64 {
    120_000
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1_000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_cool_off_ms() -> u64 {
    60_000
}

impl Default for LlmDefaults {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            temperature: default_temperature(),
            endpoint_cool_off_ms: default_cool_off_ms(),
        }
    }
}

/// The full LLM configuration tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    #[serde(default)]
    pub tiers: TierTable,
    #[serde(default)]
    pub agents: HashMap<String, AgentModelConfig>,
    #[serde(default)]
    pub defaults: LlmDefaults,
}

impl LlmConfig {
    /// Primary model for an agent: explicit primary, then the agent's tier,
    /// then the medium tier.
    pub fn model_for_agent(&self, agent_id: &str) -> String {
        let agent = self.agents.get(agent_id);
        if let Some(primary) = agent.and_then(|a| a.primary.clone()) {
            return primary;
        }
        let tier = agent.and_then(|a| a.tier).unwrap_or(ModelTier::Medium);
        let models = self.tiers.for_tier(tier);
        if models.primary.is_empty() {
            self.tiers.medium.primary.clone()
        } else {
            models.primary.clone()
        }
    }

    /// Fallback chain for an agent: primary first, then the agent's own
    /// fallbacks or the tier's, deduplicated preserving order.
    pub fn fallback_chain_for_agent(&self, agent_id: &str) -> Vec<String> {
        let agent = self.agents.get(agent_id);
        let primary = self.model_for_agent(agent_id);
        let tier = agent.and_then(|a| a.tier).unwrap_or(ModelTier::Medium);
        let fallback = agent
            .and_then(|a| a.fallback.clone())
            .unwrap_or_else(|| self.tiers.for_tier(tier).fallback.clone());
        dedup_chain(primary, fallback)
    }

    /// Fallback chain for a tier.
    pub fn fallback_chain_for_tier(&self, tier: ModelTier) -> Vec<String> {
        let models = self.tiers.for_tier(tier);
        dedup_chain(models.primary.clone(), models.fallback.clone())
    }

    /// Endpoint ids able to serve a model, in priority order, keeping only
    /// enabled endpoints with credentials.
    pub fn candidate_endpoints(&self, model_id: &str) -> Vec<(String, &EndpointConfig)> {
        let Some(model) = self.models.get(model_id) else {
            return Vec::new();
        };
        let mut candidates: Vec<(String, &EndpointConfig)> = model
            .endpoints
            .iter()
            .filter_map(|id| self.endpoints.get(id).map(|e| (id.clone(), e)))
            .filter(|(_, e)| e.enabled && e.has_credentials())
            .collect();
        candidates.sort_by_key(|(_, e)| e.priority);
        candidates
    }
}

fn dedup_chain(primary: String, fallback: Vec<String>) -> Vec<String> {
    let mut chain = Vec::with_capacity(1 + fallback.len());
    if !primary.is_empty() {
        chain.push(primary);
    }
    for model in fallback {
        if !model.is_empty() && !chain.contains(&model) {
            chain.push(model);
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        let mut config = LlmConfig {
            tiers: TierTable {
                simple: TierModels {
                    primary: "small".into(),
                    fallback: vec!["medium-model".into()],
                },
                medium: TierModels {
                    primary: "medium-model".into(),
                    fallback: vec!["big".into()],
                },
                complex: TierModels {
                    primary: "big".into(),
                    fallback: vec!["medium-model".into()],
                },
            },
            ..LlmConfig::default()
        };
        config.agents.insert(
            "researcher".into(),
            AgentModelConfig {
                tier: Some(ModelTier::Complex),
                primary: None,
                fallback: None,
            },
        );
        config.agents.insert(
            "pinned".into(),
            AgentModelConfig {
                tier: None,
                primary: Some("custom".into()),
                fallback: Some(vec!["custom".into(), "big".into()]),
            },
        );
        config
    }

    #[test]
    fn test_model_for_agent_prefers_explicit_primary() {
        assert_eq!(config().model_for_agent("pinned"), "custom");
    }

    #[test]
    fn test_model_for_agent_uses_tier() {
        assert_eq!(config().model_for_agent("researcher"), "big");
    }

    #[test]
    fn test_unknown_agent_falls_back_to_medium_tier() {
        assert_eq!(config().model_for_agent("nobody"), "medium-model");
    }

    #[test]
    fn test_fallback_chain_dedups_preserving_order() {
        assert_eq!(
            config().fallback_chain_for_agent("pinned"),
            vec!["custom".to_string(), "big".to_string()]
        );
        assert_eq!(
            config().fallback_chain_for_agent("researcher"),
            vec!["big".to_string(), "medium-model".to_string()]
        );
    }

    #[test]
    fn test_candidate_endpoints_filters_and_orders() {
        let mut config = config();
        config.endpoints.insert(
            "primary".into(),
            EndpointConfig {
                enabled: true,
                protocol: Protocol::Anthropic,
                base_url: None,
                priority: 0,
                region: None,
                cost_multiplier: None,
                api_key: Some("k".into()),
                api_key_env: None,
                azure: false,
            },
        );
        config.endpoints.insert(
            "disabled".into(),
            EndpointConfig {
                enabled: false,
                protocol: Protocol::Anthropic,
                base_url: None,
                priority: 1,
                region: None,
                cost_multiplier: None,
                api_key: Some("k".into()),
                api_key_env: None,
                azure: false,
            },
        );
        config.models.insert(
            "big".into(),
            ModelConfig {
                display_name: "Big".into(),
                endpoints: vec!["disabled".into(), "primary".into()],
                cost_per_1k_tokens: CostPer1kTokens::default(),
                max_context_tokens: None,
                capabilities: vec![],
            },
        );
        let candidates = config.candidate_endpoints("big");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, "primary");
    }
}
