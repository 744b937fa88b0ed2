use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use crate::error::OpsError;
use crate::schemas::{PlanStep, Reference, ToolCallRecord};
use crate::tools::{ToolContext, ToolExecutor};

use super::{compute_levels, extract_path, split_source, ChainError};

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub max_parallel: usize,
    pub deadline: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Ok,
    Error,
    SkippedDepFailed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub step_id: String,
    pub tool_name: String,
    pub status: StepStatus,
    pub data: Value,
    pub error: Option<OpsError>,
    pub elapsed_ms: u64,
    pub record: Option<ToolCallRecord>,
    pub references: Vec<Reference>,
}

impl StepResult {
    fn skipped(step: &PlanStep) -> Self {
        Self {
            step_id: step.step_id.clone(),
            tool_name: step.tool_name.clone(),
            status: StepStatus::SkippedDepFailed,
            data: Value::Null,
            error: None,
            elapsed_ms: 0,
            record: None,
            references: vec![],
        }
    }

    fn cancelled(step: &PlanStep, elapsed_ms: u64) -> Self {
        Self {
            step_id: step.step_id.clone(),
            tool_name: step.tool_name.clone(),
            status: StepStatus::Cancelled,
            data: Value::Null,
            error: None,
            elapsed_ms,
            record: None,
            references: vec![],
        }
    }

    /// The addressable view of this step for output mapping: downstream
    /// paths read `<step_id>.data.<...>`.
    pub fn mapping_view(&self) -> Value {
        serde_json::json!({
            "data": self.data,
            "status": self.status,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    Complete,
    Partial,
}

#[derive(Debug)]
pub struct ChainOutcome {
    pub status: ChainStatus,
    pub results: Vec<StepResult>,
}

impl ChainOutcome {
    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.iter().find(|result| result.step_id == step_id)
    }

    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.results
            .iter()
            .filter_map(|result| result.record.clone())
            .collect()
    }

    pub fn references(&self) -> Vec<Reference> {
        self.results
            .iter()
            .flat_map(|result| result.references.iter().cloned())
            .collect()
    }
}

/// Executes a validated plan as a DAG: topological levels run in order,
/// steps within a level run concurrently under a parallelism bound, and
/// the whole chain carries one deadline.
pub struct ChainExecutor {
    tools: Arc<ToolExecutor>,
}

impl ChainExecutor {
    pub fn new(tools: Arc<ToolExecutor>) -> Self {
        Self { tools }
    }

    pub async fn execute(
        &self,
        steps: &[PlanStep],
        ctx: &ToolContext,
        config: &ChainConfig,
    ) -> Result<ChainOutcome, ChainError> {
        let levels = compute_levels(steps)?;
        let by_id: HashMap<&str, &PlanStep> = steps
            .iter()
            .map(|step| (step.step_id.as_str(), step))
            .collect();

        let started = Instant::now();
        let deadline = started + config.deadline;
        let semaphore = Arc::new(Semaphore::new(config.max_parallel.max(1)));
        let mut results: HashMap<String, StepResult> = HashMap::new();

        'levels: for level in &levels {
            if Instant::now() >= deadline {
                log::warn!("chain deadline reached; cancelling remaining steps");
                for level in levels.iter().skip_while(|l| *l != level) {
                    for id in level {
                        let step = by_id[id.as_str()];
                        results.insert(id.clone(), StepResult::cancelled(step, 0));
                    }
                }
                break 'levels;
            }

            let mut pending: Vec<&PlanStep> = Vec::new();
            for id in level {
                let step = by_id[id.as_str()];
                if self.blocked_by_dependency(step, &by_id, &results) {
                    log::debug!("step '{}' skipped: required dependency failed", step.step_id);
                    results.insert(id.clone(), StepResult::skipped(step));
                } else {
                    pending.push(step);
                }
            }

            let level_results = futures::future::join_all(pending.iter().map(|step| {
                let semaphore = Arc::clone(&semaphore);
                let params = self.mapped_parameters(step, &results);
                async move {
                    let _permit = semaphore.acquire().await;
                    self.run_step(step, params, ctx, deadline).await
                }
            }))
            .await;

            for result in level_results {
                results.insert(result.step_id.clone(), result);
            }
        }

        let ordered: Vec<StepResult> = steps
            .iter()
            .filter_map(|step| results.remove(step.step_id.as_str()))
            .collect();
        let status = if ordered.iter().all(|result| result.status == StepStatus::Ok) {
            ChainStatus::Complete
        } else {
            ChainStatus::Partial
        };
        Ok(ChainOutcome {
            status,
            results: ordered,
        })
    }

    /// A step is skipped when a required dependency did not complete, or a
    /// dependency was itself skipped (the failure propagates).
    fn blocked_by_dependency(
        &self,
        step: &PlanStep,
        by_id: &HashMap<&str, &PlanStep>,
        results: &HashMap<String, StepResult>,
    ) -> bool {
        step.depends_on.iter().any(|dep| {
            let Some(result) = results.get(dep) else {
                return false;
            };
            if result.status == StepStatus::SkippedDepFailed {
                return true;
            }
            let dep_required = by_id
                .get(dep.as_str())
                .map(|dep_step| dep_step.required)
                .unwrap_or(false);
            dep_required && result.status != StepStatus::Ok
        })
    }

    /// Parameters with output-mapped values substituted. A source from a
    /// failed non-required step reads as null.
    fn mapped_parameters(
        &self,
        step: &PlanStep,
        results: &HashMap<String, StepResult>,
    ) -> Map<String, Value> {
        let mut params = step.parameters.clone();
        for (target, source) in &step.output_mapping {
            let (source_step, path) = split_source(source);
            let value = match results.get(source_step) {
                Some(result) => extract_path(&result.mapping_view(), path),
                None => Value::Null,
            };
            params.insert(target.clone(), value);
        }
        params
    }

    async fn run_step(
        &self,
        step: &PlanStep,
        params: Map<String, Value>,
        ctx: &ToolContext,
        deadline: Instant,
    ) -> StepResult {
        let started = Instant::now();
        let remaining = deadline.saturating_duration_since(started);
        if remaining.is_zero() {
            return StepResult::cancelled(step, 0);
        }

        let attempt =
            tokio::time::timeout(remaining, self.tools.execute(&step.tool_name, &params, ctx))
                .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match attempt {
            Ok(Ok(outcome)) => StepResult {
                step_id: step.step_id.clone(),
                tool_name: step.tool_name.clone(),
                status: StepStatus::Ok,
                data: outcome.data,
                error: None,
                elapsed_ms,
                record: Some(outcome.record),
                references: outcome.references,
            },
            Ok(Err(error)) => {
                log::warn!("step '{}' failed: {error}", step.step_id);
                StepResult {
                    step_id: step.step_id.clone(),
                    tool_name: step.tool_name.clone(),
                    status: StepStatus::Error,
                    data: Value::Null,
                    error: Some(error),
                    elapsed_ms,
                    record: None,
                    references: vec![],
                }
            }
            Err(_) => {
                log::warn!("step '{}' cancelled at chain deadline", step.step_id);
                StepResult::cancelled(step, elapsed_ms)
            }
        }
    }
}
