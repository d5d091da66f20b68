// Process-wide registrations: agents, toolsets, tool specs
//
// All maps are mutated only under one mutex at registration time; lookups
// clone out of the lock so readers never hold it across awaits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tether_contracts::{AgentId, RunPolicy, ToolHandle, ToolName, ToolSpec};
use tether_durable::ActivityOptions;

use crate::error::{Result, RuntimeError};
use crate::planner::Planner;
use crate::policy::ToolMetadata;
use crate::tools::ToolExecutor;

/// How a toolset's calls are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolDispatch {
    /// Wrapped in an engine activity, runs on worker pools
    #[default]
    Activity,
    /// Runs directly on the workflow thread; the executor must only touch
    /// the engine through deterministic primitives
    Inline,
}

/// One registered toolset: a `<service>.<toolset>` prefix bound to an
/// executor
#[derive(Clone)]
pub struct ToolsetRegistration {
    pub prefix: String,
    pub executor: Arc<dyn ToolExecutor>,
    /// Whether calls into this toolset may run concurrently with others
    pub parallel_safe: bool,
    pub dispatch: ToolDispatch,
}

impl ToolsetRegistration {
    pub fn new(prefix: impl Into<String>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            prefix: prefix.into(),
            executor,
            parallel_safe: true,
            dispatch: ToolDispatch::Activity,
        }
    }

    pub fn serial(mut self) -> Self {
        self.parallel_safe = false;
        self
    }

    pub fn inline(mut self) -> Self {
        self.dispatch = ToolDispatch::Inline;
        self
    }
}

/// Everything one agent brings: planner, caps, and its activity names
#[derive(Clone)]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub planner: Arc<dyn Planner>,
    pub run_policy: RunPolicy,
    pub workflow_name: String,
    pub plan_activity: String,
    pub tool_activity: String,
    pub hook_activity: String,
    pub plan_options: ActivityOptions,
    pub tool_options: ActivityOptions,
}

impl AgentRegistration {
    /// Registration with activity names derived from the agent id
    pub fn new(agent_id: AgentId, planner: Arc<dyn Planner>) -> Self {
        let id = agent_id.as_str();
        Self {
            workflow_name: format!("{id}/run"),
            plan_activity: format!("{id}/plan"),
            tool_activity: format!("{id}/execute-tool"),
            hook_activity: format!("{id}/publish-hooks"),
            agent_id,
            planner,
            run_policy: RunPolicy::default(),
            plan_options: ActivityOptions::default(),
            tool_options: ActivityOptions::default(),
        }
    }

    pub fn with_run_policy(mut self, policy: RunPolicy) -> Self {
        self.run_policy = policy;
        self
    }

    pub fn with_plan_options(mut self, options: ActivityOptions) -> Self {
        self.plan_options = options;
        self
    }

    pub fn with_tool_options(mut self, options: ActivityOptions) -> Self {
        self.tool_options = options;
        self
    }
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<AgentId, Arc<AgentRegistration>>,
    toolsets: HashMap<String, ToolsetRegistration>,
    specs: HashMap<ToolName, ToolSpec>,
}

/// Process-wide registry of agents, toolsets, and tool specs
#[derive(Default)]
pub struct RuntimeRegistry {
    inner: Mutex<RegistryInner>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_agent(&self, registration: AgentRegistration) -> Result<Arc<AgentRegistration>> {
        let mut inner = self.inner.lock();
        if inner.agents.contains_key(&registration.agent_id) {
            return Err(RuntimeError::validation(format!(
                "agent already registered: {}",
                registration.agent_id
            )));
        }
        let registration = Arc::new(registration);
        inner
            .agents
            .insert(registration.agent_id.clone(), registration.clone());
        Ok(registration)
    }

    /// Register a toolset and the specs of the tools it serves
    pub fn register_toolset(
        &self,
        registration: ToolsetRegistration,
        specs: Vec<ToolSpec>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.toolsets.contains_key(&registration.prefix) {
            return Err(RuntimeError::validation(format!(
                "toolset already registered: {}",
                registration.prefix
            )));
        }
        for spec in &specs {
            if spec.name.toolset_prefix() != registration.prefix {
                return Err(RuntimeError::validation(format!(
                    "tool {} does not belong to toolset {}",
                    spec.name, registration.prefix
                )));
            }
            if inner.specs.contains_key(&spec.name) {
                return Err(RuntimeError::validation(format!(
                    "tool already registered: {}",
                    spec.name
                )));
            }
        }

        inner
            .toolsets
            .insert(registration.prefix.clone(), registration);
        for spec in specs {
            inner.specs.insert(spec.name.clone(), spec);
        }
        Ok(())
    }

    pub fn agent(&self, agent_id: &AgentId) -> Option<Arc<AgentRegistration>> {
        self.inner.lock().agents.get(agent_id).cloned()
    }

    pub fn toolset(&self, prefix: &str) -> Option<ToolsetRegistration> {
        self.inner.lock().toolsets.get(prefix).cloned()
    }

    pub fn spec(&self, name: &ToolName) -> Option<ToolSpec> {
        self.inner.lock().specs.get(name).cloned()
    }

    /// Policy-engine view of every registered tool, sorted by id
    pub fn tool_metadata(&self) -> Vec<ToolMetadata> {
        let inner = self.inner.lock();
        let mut tools: Vec<ToolMetadata> = inner
            .specs
            .values()
            .map(|spec| ToolMetadata {
                id: spec.name.clone(),
                tags: spec.tags.clone(),
            })
            .collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// Planner-facing handles for an allow-list, preserving its order
    pub fn tool_handles(&self, allowed: &[ToolName]) -> Vec<ToolHandle> {
        let inner = self.inner.lock();
        allowed
            .iter()
            .filter_map(|name| {
                inner.specs.get(name).map(|spec| ToolHandle {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ScriptedPlanner;
    use crate::tools::FnToolExecutor;
    use tether_contracts::ToolResult;

    fn executor() -> Arc<dyn ToolExecutor> {
        Arc::new(FnToolExecutor::new(Arc::new(|meta, request| {
            Box::pin(async move {
                Ok(ToolResult::ok(
                    meta.tool_call_id,
                    request.name,
                    serde_json::Value::Null,
                ))
            })
        })))
    }

    fn spec(name: &str) -> ToolSpec {
        ToolSpec::new(ToolName::parse(name).unwrap(), "a tool")
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let registry = RuntimeRegistry::new();
        let planner = ScriptedPlanner::new().then_final("hi").build();

        registry
            .register_agent(AgentRegistration::new(
                AgentId::new("svc.agent"),
                planner.clone(),
            ))
            .unwrap();

        let duplicate =
            registry.register_agent(AgentRegistration::new(AgentId::new("svc.agent"), planner));
        assert!(matches!(duplicate, Err(RuntimeError::Validation(_))));
    }

    #[test]
    fn test_toolset_prefix_mismatch_rejected() {
        let registry = RuntimeRegistry::new();
        let result = registry.register_toolset(
            ToolsetRegistration::new("svc.ts", executor()),
            vec![spec("svc.other.search")],
        );
        assert!(matches!(result, Err(RuntimeError::Validation(_))));
    }

    #[test]
    fn test_spec_lookup_and_metadata() {
        let registry = RuntimeRegistry::new();
        registry
            .register_toolset(
                ToolsetRegistration::new("svc.ts", executor()),
                vec![
                    spec("svc.ts.search").with_tags(["io"]),
                    spec("svc.ts.fetch"),
                ],
            )
            .unwrap();

        let metadata = registry.tool_metadata();
        assert_eq!(metadata.len(), 2);
        // Sorted by id.
        assert_eq!(metadata[0].id.as_str(), "svc.ts.fetch");

        let handles = registry.tool_handles(&[ToolName::parse("svc.ts.search").unwrap()]);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].description, "a tool");
    }

    #[test]
    fn test_default_activity_names_derive_from_agent() {
        let planner = ScriptedPlanner::new().build();
        let registration = AgentRegistration::new(AgentId::new("svc.agent"), planner);

        assert_eq!(registration.workflow_name, "svc.agent/run");
        assert_eq!(registration.plan_activity, "svc.agent/plan");
        assert_eq!(registration.tool_activity, "svc.agent/execute-tool");
        assert_eq!(registration.hook_activity, "svc.agent/publish-hooks");
    }
}
