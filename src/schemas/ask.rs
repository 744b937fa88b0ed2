use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::schemas::{Block, ExecutionTrace, NextAction, Reference};

/// Incoming question with its tenant context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub tenant_id: String,
    #[serde(default)]
    pub rerun: bool,
    /// Named resolver asset override for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver_asset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_override: Option<String>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            tenant_id: tenant_id.into(),
            rerun: false,
            resolver_asset: None,
            source_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub route: String,
    pub used_tools: Vec<String>,
    pub summary: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The structured answer. Produced for every request the pipeline accepted,
/// including failed ones: the trace and any partial blocks are always
/// attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub blocks: Vec<Block>,
    pub references: Vec<Reference>,
    pub next_actions: Vec<NextAction>,
    pub meta: ResponseMeta,
    pub trace: ExecutionTrace,
}

/// Events emitted by the streaming surface. Transport framing is the
/// caller's concern; `to_sse_frame` renders the standard envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    Complete(Box<AskResponse>),
    Error { error_code: ErrorCode, message: String, trace_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub trace_id: Uuid,
    pub stage: String,
    pub detail: Value,
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Progress(_) => "progress",
            StreamEvent::Complete(_) => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Renders `event: <name>\ndata: <json>\n\n`. UUID fields serialize as
    /// strings, durations as integer milliseconds.
    pub fn to_sse_frame(&self) -> Result<String, serde_json::Error> {
        let data = match self {
            StreamEvent::Progress(event) => serde_json::to_string(event)?,
            StreamEvent::Complete(response) => serde_json::to_string(response)?,
            StreamEvent::Error {
                error_code,
                message,
                trace_id,
            } => serde_json::to_string(&serde_json::json!({
                "error_code": error_code,
                "message": message,
                "trace_id": trace_id,
            }))?,
        };
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_envelope() {
        let event = StreamEvent::Progress(ProgressEvent {
            trace_id: Uuid::new_v4(),
            stage: "execute".into(),
            detail: serde_json::json!({"steps_done": 1}),
        });
        let frame = event.to_sse_frame().unwrap();
        assert!(frame.starts_with("event: progress\ndata: {"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn error_event_carries_string_trace_id() {
        let id = Uuid::new_v4();
        let event = StreamEvent::Error {
            error_code: ErrorCode::PlanInvalid,
            message: "cycle detected".into(),
            trace_id: id,
        };
        let frame = event.to_sse_frame().unwrap();
        assert!(frame.contains(&id.to_string()));
        assert!(frame.contains("PLAN_INVALID"));
    }
}
