//! CourseForge LLM: gateway adapters and role routing
//!
//! Two seams:
//! - `gateway`: the uniform call surface over concrete providers
//!   (OpenAI-compatible and Gemini-family), plus a stub for tests
//! - `registry`: role key → gateway resolution with a documented
//!   fallback chain

pub mod gateway;
pub mod registry;
pub mod stub;
pub mod types;

// Re-export main types
pub use gateway::{GatewayError, GeminiGateway, LlmGateway, OpenAiGateway};
pub use registry::LlmRegistry;
pub use stub::StubGateway;
pub use types::CompletionRequest;
