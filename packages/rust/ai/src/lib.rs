//! AI service clients for docforge.
//!
//! Defines the completion/embedding call contracts consumed by the
//! resolution and planning pipelines, an OpenAI-compatible implementation
//! over HTTP, and the versioned prompt registry.

pub mod client;
pub mod prompts;

pub use client::{CompletionClient, EmbeddingClient, JsonCompletion, OpenAiClient};
pub use prompts::get_prompt;
