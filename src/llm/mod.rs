mod error;
pub use error::*;

mod client;
pub use client::*;

mod fixed;
pub use fixed::*;

use async_trait::async_trait;

/// Boundary to the language-model provider. The orchestrator only ever
/// needs one operation: a system+user prompt in, raw text out. Hosting and
/// provider choice stay outside the core.
#[async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
}
