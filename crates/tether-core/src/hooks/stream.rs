// Stream projection: hook events -> UI-facing stream events
//
// A whitelisted subset of the hook stream maps onto stream events; every
// other payload is silently ignored. Run identity is never rewritten, so
// per-run ordering of the projection matches hook emission order.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_contracts::{
    HookEvent, HookPayload, RunPhase, StreamEvent, StreamFailure, WorkflowStreamStatus,
};

use super::{HookError, HookSubscriber};

/// Destination for projected stream events
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn send(&self, event: StreamEvent) -> Result<(), HookError>;
}

/// Sink forwarding into an unbounded channel (SSE bridges, tests)
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StreamSink for ChannelSink {
    async fn send(&self, event: StreamEvent) -> Result<(), HookError> {
        self.tx
            .send(event)
            .map_err(|_| HookError("stream channel closed".into()))
    }
}

/// Canonical subscriber projecting hook events into stream events
pub struct StreamSubscriber {
    sink: Arc<dyn StreamSink>,
}

impl StreamSubscriber {
    pub fn new(sink: Arc<dyn StreamSink>) -> Self {
        Self { sink }
    }

    fn project(event: &HookEvent) -> Option<StreamEvent> {
        let run_id = event.run_id.clone();
        match &event.payload {
            HookPayload::AssistantMessage { message } => Some(StreamEvent::AssistantReply {
                run_id,
                text: message.content.clone(),
            }),

            HookPayload::PlannerNote { text } => Some(StreamEvent::PlannerThought {
                run_id,
                index: 0,
                text: Some(text.clone()),
                delta: None,
                signature: None,
                is_final: true,
            }),

            // A final structured block sends no delta text; a non-final
            // block sends its partial text as a delta.
            HookPayload::ThinkingBlock {
                index,
                text,
                signature,
                is_final,
            } => Some(if *is_final {
                StreamEvent::PlannerThought {
                    run_id,
                    index: *index,
                    text: text.clone(),
                    delta: None,
                    signature: signature.clone(),
                    is_final: true,
                }
            } else {
                StreamEvent::PlannerThought {
                    run_id,
                    index: *index,
                    text: None,
                    delta: text.clone(),
                    signature: signature.clone(),
                    is_final: false,
                }
            }),

            HookPayload::ToolCallScheduled {
                tool_call_id, name, ..
            } => Some(StreamEvent::ToolStart {
                run_id,
                tool_call_id: tool_call_id.clone(),
                name: name.clone(),
            }),

            HookPayload::ToolCallUpdated {
                tool_call_id,
                expected_children_total,
            } => Some(StreamEvent::ToolUpdate {
                run_id,
                tool_call_id: tool_call_id.clone(),
                expected_children_total: *expected_children_total,
            }),

            HookPayload::ToolResultReceived {
                tool_call_id,
                name,
                success,
                error,
                ..
            } => Some(StreamEvent::ToolEnd {
                run_id,
                tool_call_id: tool_call_id.clone(),
                name: name.clone(),
                success: *success,
                error: error.as_ref().map(|e| e.message.clone()),
            }),

            HookPayload::RunPhaseChanged { phase } => Some(StreamEvent::Workflow {
                run_id,
                phase: *phase,
                status: WorkflowStreamStatus::Running,
                failure: None,
            }),

            HookPayload::RunCompleted { phase, failure } => {
                let status = match phase {
                    RunPhase::Completed => WorkflowStreamStatus::Succeeded,
                    RunPhase::Canceled => WorkflowStreamStatus::Canceled,
                    _ => WorkflowStreamStatus::Failed,
                };
                let failure = failure.as_ref().map(|f| StreamFailure {
                    // Cancellation keeps the debug message only.
                    message: if *phase == RunPhase::Canceled {
                        None
                    } else {
                        Some(f.public_message.clone())
                    },
                    debug_message: f.debug_message.clone(),
                    provider: f.provider.clone(),
                    kind: f.kind,
                    retryable: f.retryable,
                });
                Some(StreamEvent::Workflow {
                    run_id,
                    phase: *phase,
                    status,
                    failure,
                })
            }

            HookPayload::AgentRunStarted {
                child_run_id,
                child_agent_id,
                parent_tool_call_id,
            } => Some(StreamEvent::AgentRunStarted {
                run_id,
                child_run_id: child_run_id.clone(),
                child_agent_id: child_agent_id.clone(),
                parent_tool_call_id: parent_tool_call_id.clone(),
            }),

            // Not part of the projection whitelist.
            HookPayload::RunStarted
            | HookPayload::RunPaused { .. }
            | HookPayload::RunResumed { .. }
            | HookPayload::RetryHintIssued { .. }
            | HookPayload::MemoryAppended { .. }
            | HookPayload::PolicyDecision { .. } => None,
        }
    }
}

#[async_trait]
impl HookSubscriber for StreamSubscriber {
    async fn on_event(&self, event: &HookEvent) -> Result<(), HookError> {
        if let Some(projected) = Self::project(event) {
            self.sink.send(projected).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_contracts::{AgentId, Message, RunFailure, RunId, ToolCallId, ToolName};

    fn event(payload: HookPayload) -> HookEvent {
        HookEvent::new(
            RunId::new("r1"),
            AgentId::new("svc.agent"),
            None,
            Utc::now(),
            payload,
        )
    }

    async fn project_one(payload: HookPayload) -> Option<StreamEvent> {
        let (sink, mut rx) = ChannelSink::new();
        let subscriber = StreamSubscriber::new(Arc::new(sink));
        subscriber.on_event(&event(payload)).await.unwrap();
        rx.try_recv().ok()
    }

    #[tokio::test]
    async fn test_assistant_message_projects_to_reply() {
        let projected = project_one(HookPayload::AssistantMessage {
            message: Message::assistant("Hello"),
        })
        .await
        .unwrap();

        match projected {
            StreamEvent::AssistantReply { text, .. } => assert_eq!(text, "Hello"),
            other => panic!("unexpected projection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_final_thinking_block_sends_no_delta() {
        let projected = project_one(HookPayload::ThinkingBlock {
            index: 1,
            text: Some("conclusion".into()),
            signature: Some("sig".into()),
            is_final: true,
        })
        .await
        .unwrap();

        match projected {
            StreamEvent::PlannerThought {
                text,
                delta,
                signature,
                is_final,
                ..
            } => {
                assert_eq!(text.as_deref(), Some("conclusion"));
                assert!(delta.is_none());
                assert_eq!(signature.as_deref(), Some("sig"));
                assert!(is_final);
            }
            other => panic!("unexpected projection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_thinking_block_sends_delta() {
        let projected = project_one(HookPayload::ThinkingBlock {
            index: 0,
            text: Some("partial".into()),
            signature: None,
            is_final: false,
        })
        .await
        .unwrap();

        match projected {
            StreamEvent::PlannerThought { text, delta, .. } => {
                assert!(text.is_none());
                assert_eq!(delta.as_deref(), Some("partial"));
            }
            other => panic!("unexpected projection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_canceled_run_omits_public_message() {
        let projected = project_one(HookPayload::RunCompleted {
            phase: RunPhase::Canceled,
            failure: Some(RunFailure::new("canceled", "operator stop")),
        })
        .await
        .unwrap();

        match projected {
            StreamEvent::Workflow {
                status, failure, ..
            } => {
                assert_eq!(status, WorkflowStreamStatus::Canceled);
                let failure = failure.unwrap();
                assert!(failure.message.is_none());
                assert_eq!(failure.debug_message, "operator stop");
            }
            other => panic!("unexpected projection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_events_project() {
        let start = project_one(HookPayload::ToolCallScheduled {
            tool_call_id: ToolCallId::new("c1"),
            name: ToolName::parse("svc.ts.search").unwrap(),
            payload: serde_json::json!({"q": "x"}),
            parent_tool_call_id: None,
        })
        .await;
        assert!(matches!(start, Some(StreamEvent::ToolStart { .. })));

        let end = project_one(HookPayload::ToolResultReceived {
            tool_call_id: ToolCallId::new("c1"),
            name: ToolName::parse("svc.ts.search").unwrap(),
            success: true,
            result: Some(serde_json::json!({"hits": 1})),
            error: None,
            retry_hint: None,
        })
        .await;
        assert!(matches!(
            end,
            Some(StreamEvent::ToolEnd { success: true, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_whitelisted_events_are_ignored() {
        assert!(project_one(HookPayload::RunStarted).await.is_none());
        assert!(project_one(HookPayload::MemoryAppended { count: 3 })
            .await
            .is_none());
    }
}
