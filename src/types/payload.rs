//! Resolved prompt configuration payloads

use serde::{Deserialize, Serialize};

/// A resolved prompt configuration as returned by the configuration service.
///
/// Opaque to the cache: entries hold it behind an `Arc` and replace it
/// wholesale on refresh. Fields the client does not know about are kept in
/// [`extra`](Self::extra) so newer service versions round-trip intact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPayload {
    /// Model identifier the completion should be sent to.
    pub model: String,
    /// Prompt text (system prompt for the completion call).
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Extended reasoning settings, present for thinking-mode configurations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConfigPayload {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn thinking(mut self, thinking: ThinkingConfig) -> Self {
        self.thinking = Some(thinking);
        self
    }
}

/// Extended reasoning ("thinking") sub-configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

/// Body of a successful `POST /api/resolve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub config: ConfigPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ab_test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

impl ResolvedConfig {
    pub fn new(config: ConfigPayload) -> Self {
        Self {
            config,
            ab_test_id: None,
            variant_id: None,
        }
    }

    pub fn variant(mut self, ab_test_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        self.ab_test_id = Some(ab_test_id.into());
        self.variant_id = Some(variant_id.into());
        self
    }
}
