use std::sync::Mutex;

use async_trait::async_trait;

use super::{Llm, LlmError};

/// Scripted model for tests and mock mode: returns canned completions in
/// order, then repeats the last one.
#[derive(Default)]
pub struct FixedLlm {
    responses: Mutex<Vec<String>>,
    unreachable: bool,
}

impl FixedLlm {
    pub fn with_response(self, response: impl Into<String>) -> Self {
        self.responses
            .lock()
            .expect("fixed llm mutex poisoned")
            .push(response.into());
        self
    }

    /// Simulates an unreachable provider.
    pub fn unreachable() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            unreachable: true,
        }
    }
}

#[async_trait]
impl Llm for FixedLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, LlmError> {
        if self.unreachable {
            return Err(LlmError::OverloadedError("provider unreachable".into()));
        }
        let mut responses = self.responses.lock().expect("fixed llm mutex poisoned");
        if responses.is_empty() {
            return Err(LlmError::MalformedResponse("no scripted response".into()));
        }
        if responses.len() == 1 {
            Ok(responses[0].clone())
        } else {
            Ok(responses.remove(0))
        }
    }
}
