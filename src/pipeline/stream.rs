use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;

use crate::schemas::{AskRequest, StreamEvent, TraceStatus};

use super::PipelineRunner;

/// Streaming surface over the pipeline: periodic `progress` events per
/// stage, then a terminal `complete` or `error`. SSE framing is the
/// transport's job; each event renders itself with `to_sse_frame`.
pub fn ask_stream(
    runner: Arc<PipelineRunner>,
    request: AskRequest,
) -> impl Stream<Item = StreamEvent> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let response = runner.run(request, Some(sender.clone())).await;
        let terminal = if response.trace.status == TraceStatus::Error {
            match (response.meta.error_code, &response.meta.message) {
                (Some(error_code), Some(message)) => StreamEvent::Error {
                    error_code,
                    message: message.clone(),
                    trace_id: response.trace.trace_id,
                },
                _ => StreamEvent::Complete(Box::new(response)),
            }
        } else {
            StreamEvent::Complete(Box::new(response))
        };
        let _ = sender.send(terminal);
    });

    async_stream::stream! {
        while let Some(event) = receiver.recv().await {
            let terminal = matches!(
                event,
                StreamEvent::Complete(_) | StreamEvent::Error { .. }
            );
            yield event;
            if terminal {
                break;
            }
        }
    }
}
