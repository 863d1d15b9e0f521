//! Request types shared by all gateways

use serde::{Deserialize, Serialize};

/// One completion request; knobs left as `None` fall back to the
/// gateway's configured defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// User prompt
    pub prompt: String,
    /// Optional system instruction
    pub system: Option<String>,
    /// Sampling temperature (0.0 to 2.0)
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Create a request with default knobs
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}
