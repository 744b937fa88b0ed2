use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::schemas::Reference;

/// The five named phases of the question-to-answer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Route,
    Validate,
    Execute,
    Compose,
    Present,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Route => "route",
            StageName::Validate => "validate",
            StageName::Execute => "execute",
            StageName::Compose => "compose",
            StageName::Present => "present",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Ok,
    Error,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
    Skipped,
}

/// One recorded execution of a stage: its input and output snapshots plus
/// diagnostics. Snapshots are deep copies taken at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpan {
    pub stage: StageName,
    pub input: Value,
    pub output: Value,
    pub elapsed_ms: u64,
    pub status: SpanStatus,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Asset name -> published version consumed by this stage.
    #[serde(default)]
    pub applied_assets: HashMap<String, i64>,
    pub created_at: DateTime<Utc>,
}

/// One recorded tool invocation. Output is summarized (row counts, sizes),
/// never the full payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub elapsed_ms: u64,
    pub input_params: Value,
    pub output_summary: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Error,
    Timeout,
    PolicyViolation,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Error => "error",
            TriggerType::Timeout => "timeout",
            TriggerType::PolicyViolation => "policy_violation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSeverity {
    Info,
    Warning,
    Critical,
}

/// A stage failure asking the control loop for permission to replan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanTrigger {
    pub trigger_type: TriggerType,
    pub stage: StageName,
    pub reason: String,
    pub severity: TriggerSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

/// Sparse mutation applied to the plan input when re-entering Route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplanPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    /// original tool name -> replacement.
    #[serde(default)]
    pub swap_tools: HashMap<String, String>,
    #[serde(default)]
    pub extra_hints: Vec<String>,
}

impl ReplanPatch {
    pub fn is_empty(&self) -> bool {
        self.depth.is_none() && self.swap_tools.is_empty() && self.extra_hints.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplanEvent {
    pub trigger: ReplanTrigger,
    pub patch: ReplanPatch,
    pub approved: bool,
    pub replan_number: u32,
    pub created_at: DateTime<Utc>,
}

/// The append-only causal record of one question's journey through the
/// pipeline. Immutable once `finished_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub trace_id: Uuid,
    pub tenant_id: String,
    pub question: String,
    pub status: TraceStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub stages: Vec<StageSpan>,
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub asset_versions: HashMap<String, i64>,
    #[serde(default)]
    pub replan_events: Vec<ReplanEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_trace_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&TriggerType::PolicyViolation).unwrap(),
            "\"policy_violation\""
        );
    }

    #[test]
    fn severity_ordering_puts_critical_last() {
        assert!(TriggerSeverity::Critical > TriggerSeverity::Warning);
        assert!(TriggerSeverity::Warning > TriggerSeverity::Info);
    }

    #[test]
    fn trace_id_serializes_as_string() {
        let trace = ExecutionTrace {
            trace_id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            question: "total number of CIs".into(),
            status: TraceStatus::Ok,
            created_at: Utc::now(),
            finished_at: Some(Utc::now()),
            duration_ms: 12,
            stages: vec![],
            tool_calls: vec![],
            asset_versions: HashMap::new(),
            replan_events: vec![],
            parent_trace_id: None,
        };
        let json = serde_json::to_value(&trace).unwrap();
        assert!(json["trace_id"].is_string());
        assert_eq!(json["duration_ms"], 12);
    }

    #[test]
    fn empty_patch_detection() {
        assert!(ReplanPatch::default().is_empty());
        let patch = ReplanPatch {
            depth: Some(3),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
