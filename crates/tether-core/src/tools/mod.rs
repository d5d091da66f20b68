// Unified tool execution
//
// One executor seam regardless of backing: local handlers, remote RPC
// callers, or another agent run inline. The runtime looks up the toolset
// registration by the tool's `<service>.<toolset>` prefix and invokes its
// executor; activity-backed toolsets run on worker pools, inline toolsets
// run on the workflow thread and must only touch the engine through its
// deterministic primitives.

pub(crate) mod agent_tool;
mod caller;
mod child_tracker;

pub use caller::{TaskCaller, TaskCallerExecutor, ToolCaller, ToolCallerExecutor};
pub use child_tracker::ChildTracker;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use tether_contracts::{
    ArtifactMode, ToolActivityInput, ToolError, ToolInvocationMeta, ToolRequest, ToolResult,
    ToolSpec,
};
use tether_durable::ActivityError;

/// Executes one tool invocation.
///
/// Tool-level failures ride inside `ToolResult.error` and do not abort the
/// run; an `Err` is an infrastructure failure handled by the engine's
/// retry policy.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        meta: &ToolInvocationMeta,
        request: &ToolRequest,
    ) -> Result<ToolResult, ActivityError>;
}

type ExecuteFn = Arc<
    dyn Fn(ToolInvocationMeta, ToolRequest) -> BoxFuture<'static, Result<ToolResult, ActivityError>>
        + Send
        + Sync,
>;

/// Function adapter for simple executors
#[derive(Clone)]
pub struct FnToolExecutor {
    f: ExecuteFn,
}

impl FnToolExecutor {
    pub fn new(f: ExecuteFn) -> Self {
        Self { f }
    }
}

#[async_trait]
impl ToolExecutor for FnToolExecutor {
    async fn execute(
        &self,
        meta: &ToolInvocationMeta,
        request: &ToolRequest,
    ) -> Result<ToolResult, ActivityError> {
        (self.f)(meta.clone(), request.clone()).await
    }
}

/// Normalize a tool result against its spec.
///
/// Declared server-data artifacts are re-encoded through the tool spec's codec
/// into canonical JSON. A missing codec is fatal for required artifacts
/// and a no-op for optional ones.
pub fn normalize_result(spec: &ToolSpec, result: &mut ToolResult) -> Result<(), ToolError> {
    let Some(server_data) = &spec.server_data else {
        return Ok(());
    };

    match (&server_data.codec, server_data.mode) {
        (None, ArtifactMode::Required) => Err(ToolError::new(format!(
            "tool {} declares required server data but no codec",
            spec.name
        ))),
        (None, ArtifactMode::Optional) => Ok(()),
        (Some(codec), _) => {
            for artifact in &mut result.artifacts {
                let bytes = codec
                    .encode(&artifact.data)
                    .map_err(|e| ToolError::new(format!("artifact encode failed: {e}")))?;
                artifact.data = codec
                    .decode(&bytes)
                    .map_err(|e| ToolError::new(format!("artifact decode failed: {e}")))?;
            }
            Ok(())
        }
    }
}

/// Build the activity input for one invocation
pub fn activity_input(meta: ToolInvocationMeta, request: ToolRequest) -> ToolActivityInput {
    ToolActivityInput { meta, request }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_contracts::{Artifact, RunId, ToolCallId, ToolCodec, ToolName, TurnId};

    fn meta() -> ToolInvocationMeta {
        ToolInvocationMeta {
            run_id: RunId::new("r1"),
            session_id: None,
            turn_id: TurnId::new("t1"),
            tool_call_id: ToolCallId::new("c1"),
            parent_tool_call_id: None,
            attempt: 1,
        }
    }

    fn name() -> ToolName {
        ToolName::parse("svc.ts.search").unwrap()
    }

    #[tokio::test]
    async fn test_fn_executor() {
        let executor = FnToolExecutor::new(Arc::new(|meta, request| {
            Box::pin(async move {
                Ok(ToolResult::ok(
                    meta.tool_call_id,
                    request.name,
                    serde_json::json!({"echo": request.payload}),
                ))
            })
        }));

        let request = ToolRequest::new(name(), serde_json::json!({"q": "x"}));
        let result = executor.execute(&meta(), &request).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.result.unwrap()["echo"]["q"], "x");
    }

    #[test]
    fn test_normalize_without_server_data_is_noop() {
        let spec = ToolSpec::new(name(), "search");
        let mut result = ToolResult::ok(ToolCallId::new("c1"), name(), serde_json::json!({}));
        assert!(normalize_result(&spec, &mut result).is_ok());
    }

    #[test]
    fn test_normalize_required_without_codec_is_fatal() {
        let spec = ToolSpec::new(name(), "search").with_server_data(None, ArtifactMode::Required);
        let mut result = ToolResult::ok(ToolCallId::new("c1"), name(), serde_json::json!({}));

        let err = normalize_result(&spec, &mut result).unwrap_err();
        assert!(err.message.contains("no codec"));
    }

    #[test]
    fn test_normalize_optional_without_codec_is_noop() {
        let spec = ToolSpec::new(name(), "search").with_server_data(None, ArtifactMode::Optional);
        let mut result = ToolResult::ok(ToolCallId::new("c1"), name(), serde_json::json!({}));
        assert!(normalize_result(&spec, &mut result).is_ok());
    }

    #[test]
    fn test_normalize_encodes_artifacts_canonically() {
        let spec = ToolSpec::new(name(), "search")
            .with_server_data(Some(ToolCodec::json()), ArtifactMode::Required);
        let mut result = ToolResult::ok(ToolCallId::new("c1"), name(), serde_json::json!({}));
        result.artifacts.push(Artifact {
            kind: "report".into(),
            data: serde_json::json!({"pages": 3}),
        });

        normalize_result(&spec, &mut result).unwrap();
        assert_eq!(result.artifacts[0].data["pages"], 3);
    }
}
