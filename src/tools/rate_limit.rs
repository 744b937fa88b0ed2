use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::sync::RwLock;

use super::ToolError;

/// Per-tool concurrency tokens. Acquisition is bounded by a short timeout;
/// exhaustion surfaces as `RATE_LIMITED` rather than queueing unboundedly.
#[derive(Default)]
pub struct RateLimiter {
    semaphores: RwLock<HashMap<String, Arc<Semaphore>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn semaphore_for(&self, tool_name: &str, max_concurrent: u32) -> Arc<Semaphore> {
        if let Some(semaphore) = self.semaphores.read().await.get(tool_name) {
            return Arc::clone(semaphore);
        }
        let mut semaphores = self.semaphores.write().await;
        Arc::clone(
            semaphores
                .entry(tool_name.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(max_concurrent.max(1) as usize))),
        )
    }

    /// Acquires one execution token for the tool, waiting at most
    /// `acquire_timeout`.
    pub async fn acquire(
        &self,
        tool_name: &str,
        max_concurrent: u32,
        acquire_timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, ToolError> {
        let semaphore = self.semaphore_for(tool_name, max_concurrent).await;
        tokio::time::timeout(acquire_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| ToolError::RateLimited(tool_name.to_string()))?
            .map_err(|_| ToolError::RateLimited(tool_name.to_string()))
    }
}
