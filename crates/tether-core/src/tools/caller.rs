// Remote caller boundary
//
// External protocol surfaces plug in here: an MCP client implements
// ToolCaller, an A2A client implements TaskCaller, and either registers a
// toolset whose executor delegates to the caller. The runtime mandates no
// wire framing; callers own their transport.

use std::sync::Arc;

use async_trait::async_trait;

use tether_contracts::{ToolInvocationMeta, ToolRequest, ToolResult};
use tether_durable::ActivityError;

use super::ToolExecutor;

/// Tool-call style remote boundary (MCP-shaped)
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call_tool(
        &self,
        meta: &ToolInvocationMeta,
        request: &ToolRequest,
    ) -> Result<ToolResult, ActivityError>;
}

/// Task style remote boundary (A2A-shaped)
#[async_trait]
pub trait TaskCaller: Send + Sync {
    async fn send_task(
        &self,
        meta: &ToolInvocationMeta,
        request: &ToolRequest,
    ) -> Result<ToolResult, ActivityError>;
}

/// Executor delegating every invocation to a [`ToolCaller`]
pub struct ToolCallerExecutor {
    caller: Arc<dyn ToolCaller>,
}

impl ToolCallerExecutor {
    pub fn new(caller: Arc<dyn ToolCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl ToolExecutor for ToolCallerExecutor {
    async fn execute(
        &self,
        meta: &ToolInvocationMeta,
        request: &ToolRequest,
    ) -> Result<ToolResult, ActivityError> {
        self.caller.call_tool(meta, request).await
    }
}

/// Executor delegating every invocation to a [`TaskCaller`]
pub struct TaskCallerExecutor {
    caller: Arc<dyn TaskCaller>,
}

impl TaskCallerExecutor {
    pub fn new(caller: Arc<dyn TaskCaller>) -> Self {
        Self { caller }
    }
}

#[async_trait]
impl ToolExecutor for TaskCallerExecutor {
    async fn execute(
        &self,
        meta: &ToolInvocationMeta,
        request: &ToolRequest,
    ) -> Result<ToolResult, ActivityError> {
        self.caller.send_task(meta, request).await
    }
}
