use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::schemas::{
    ExecutionTrace, ReplanEvent, StageSpan, ToolCallRecord, TraceStatus,
};

/// Default in-memory budget for one trace's buffered snapshots.
pub const DEFAULT_TRACE_BUDGET_BYTES: usize = 512 * 1024;

/// Per-request trace assembly. Spans and tool calls buffer in memory and
/// flush to the store as one immutable record at completion. When the
/// byte budget is exceeded, tool output summaries truncate first, then
/// stage I/O snapshots.
#[derive(Debug)]
pub struct TraceBuilder {
    trace_id: Uuid,
    tenant_id: String,
    question: String,
    created_at: chrono::DateTime<Utc>,
    stages: Vec<StageSpan>,
    tool_calls: Vec<ToolCallRecord>,
    asset_versions: std::collections::HashMap<String, i64>,
    replan_events: Vec<ReplanEvent>,
    parent_trace_id: Option<Uuid>,
    budget_bytes: usize,
}

impl TraceBuilder {
    pub fn start(tenant_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            question: question.into(),
            created_at: Utc::now(),
            stages: Vec::new(),
            tool_calls: Vec::new(),
            asset_versions: std::collections::HashMap::new(),
            replan_events: Vec::new(),
            parent_trace_id: None,
            budget_bytes: DEFAULT_TRACE_BUDGET_BYTES,
        }
    }

    pub fn with_parent(mut self, parent_trace_id: Uuid) -> Self {
        self.parent_trace_id = Some(parent_trace_id);
        self
    }

    pub fn with_budget_bytes(mut self, budget_bytes: usize) -> Self {
        self.budget_bytes = budget_bytes;
        self
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn record_stage(&mut self, span: StageSpan) {
        self.stages.push(span);
        self.enforce_budget();
    }

    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
        self.enforce_budget();
    }

    pub fn record_asset_version(&mut self, name: impl Into<String>, version: i64) {
        self.asset_versions.insert(name.into(), version);
    }

    pub fn record_replan(&mut self, event: ReplanEvent) {
        self.replan_events.push(event);
    }

    pub fn replan_count(&self) -> usize {
        self.replan_events
            .iter()
            .filter(|event| event.approved)
            .count()
    }

    fn buffered_bytes(&self) -> usize {
        let stages = serde_json::to_string(&self.stages)
            .map(|text| text.len())
            .unwrap_or(0);
        let calls = serde_json::to_string(&self.tool_calls)
            .map(|text| text.len())
            .unwrap_or(0);
        stages + calls
    }

    /// Truncation order under memory pressure: older tool summaries first,
    /// then older stage snapshots.
    fn enforce_budget(&mut self) {
        if self.buffered_bytes() <= self.budget_bytes {
            return;
        }
        for index in 0..self.tool_calls.len() {
            let call = &mut self.tool_calls[index];
            call.output_summary = Value::Null;
            call.input_params = Value::Null;
            if self.buffered_bytes() <= self.budget_bytes {
                log::warn!(
                    "trace {} over budget: truncated tool call payloads",
                    self.trace_id
                );
                return;
            }
        }
        for index in 0..self.stages.len() {
            let span = &mut self.stages[index];
            span.input = Value::Null;
            span.output = Value::Null;
            if self.buffered_bytes() <= self.budget_bytes {
                break;
            }
        }
        log::warn!(
            "trace {} over budget: truncated stage snapshots",
            self.trace_id
        );
    }

    /// Seals the trace. The result is immutable; stage spans recorded on
    /// failure paths are preserved.
    pub fn finish(self, status: TraceStatus) -> ExecutionTrace {
        let finished_at = Utc::now();
        ExecutionTrace {
            trace_id: self.trace_id,
            tenant_id: self.tenant_id,
            question: self.question,
            status,
            created_at: self.created_at,
            finished_at: Some(finished_at),
            duration_ms: (finished_at - self.created_at).num_milliseconds().max(0) as u64,
            stages: self.stages,
            tool_calls: self.tool_calls,
            asset_versions: self.asset_versions,
            replan_events: self.replan_events,
            parent_trace_id: self.parent_trace_id,
        }
    }
}
