//! Model provider configuration and catalog.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ValidationError;

/// Model id used when the request does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-lite";

/// Fixed sampling temperature for chat generations.
pub const GENERATION_TEMPERATURE: f32 = 0.7;

/// An entry in the model catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub provider: &'static str,
    pub description: &'static str,
}

static MODELS: Lazy<Vec<ModelInfo>> = Lazy::new(|| {
    vec![
        ModelInfo {
            id: "gemini-2.5-pro",
            name: "Gemini Pro",
            provider: "Google",
            description: "The most powerful model in the Gemini family",
        },
        ModelInfo {
            id: "gemini-2.5-flash",
            name: "Gemini Flash",
            provider: "Google",
            description: "The fastest model in the Gemini family",
        },
        ModelInfo {
            id: "gemini-2.5-flash-lite",
            name: "Gemini Flash Lite",
            provider: "Google",
            description: "The lightest model in the Gemini family",
        },
    ]
});

/// Models this deployment can serve.
pub fn available_models() -> &'static [ModelInfo] {
    &MODELS
}

/// Resolves a requested model id to a known one, falling back to the default.
pub fn resolve_model_id(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|id| MODELS.iter().find(|m| m.id == id))
        .map(|m| m.id)
        .unwrap_or(DEFAULT_MODEL)
}

/// AI provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    /// API key for the chat-completions endpoint
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl AiConfig {
    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check if an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().is_some_and(|k| !k.is_empty())
    }

    /// Validate AI configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.has_api_key() {
            return Err(ValidationError::MissingRequired("AI_API_KEY"));
        }
        Ok(())
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_timeout() -> u64 {
    60
}
