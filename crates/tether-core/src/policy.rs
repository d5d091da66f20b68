// Policy engine: per-turn tool allow-listing and cap adjustment
//
// Decisions happen on the workflow thread, so implementations must be
// deterministic: same input, same decision.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use tether_contracts::{CapsState, RetryHint, RetryReason, ToolName};

/// Canonical label naming the engine that produced a decision
pub const LABEL_POLICY_ENGINE: &str = "policy_engine";

/// Registry view of one tool offered to the policy engine
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub id: ToolName,
    pub tags: Vec<String>,
}

/// Input to one per-turn policy decision
#[derive(Debug, Clone)]
pub struct PolicyInput {
    /// Every registered tool
    pub tools: Vec<ToolMetadata>,
    /// Planner-requested tool ids; empty means "all"
    pub requested: Vec<ToolName>,
    pub caps: CapsState,
    /// Hint issued by a failing tool on the previous turn
    pub last_hint: Option<RetryHint>,
}

/// Outcome of one policy decision
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Ordered, deduplicated allow-list for the turn
    pub allowed_tools: Vec<ToolName>,
    /// Possibly adjusted caps
    pub caps: CapsState,
    pub labels: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Decides, per turn, which tools the planner may use.
///
/// Runs on the deterministic workflow thread: no I/O, no wall-clock, no
/// randomness.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Stable identifier recorded under the `policy_engine` label
    fn id(&self) -> &str;

    async fn decide(&self, input: PolicyInput) -> PolicyDecision;
}

/// Allow/block-list policy engine with retry-hint honoring.
///
/// - empty allow sets mean "everything not blocked"
/// - a `restrict_to_tool` hint collapses the allow-list to that tool and
///   lower-bounds the remaining calls to one
/// - a `tool_unavailable` hint removes the tool for the next turn
pub struct BasicPolicyEngine {
    id: String,
    allow_tools: BTreeSet<String>,
    block_tools: BTreeSet<String>,
    allow_tags: BTreeSet<String>,
    block_tags: BTreeSet<String>,
}

impl BasicPolicyEngine {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            allow_tools: BTreeSet::new(),
            block_tools: BTreeSet::new(),
            allow_tags: BTreeSet::new(),
            block_tags: BTreeSet::new(),
        }
    }

    /// Allow everything; the default engine of a fresh runtime
    pub fn allow_all() -> Self {
        Self::new("basic")
    }

    pub fn allow_tool(mut self, tool: impl Into<String>) -> Self {
        self.allow_tools.insert(tool.into());
        self
    }

    pub fn block_tool(mut self, tool: impl Into<String>) -> Self {
        self.block_tools.insert(tool.into());
        self
    }

    pub fn allow_tag(mut self, tag: impl Into<String>) -> Self {
        self.allow_tags.insert(tag.into());
        self
    }

    pub fn block_tag(mut self, tag: impl Into<String>) -> Self {
        self.block_tags.insert(tag.into());
        self
    }

    fn admits(&self, tool: &ToolMetadata) -> bool {
        let id = tool.id.as_str();
        if self.block_tools.contains(id) {
            return false;
        }
        if tool.tags.iter().any(|t| self.block_tags.contains(t)) {
            return false;
        }
        let allow_configured = !self.allow_tools.is_empty() || !self.allow_tags.is_empty();
        if !allow_configured {
            return true;
        }
        self.allow_tools.contains(id) || tool.tags.iter().any(|t| self.allow_tags.contains(t))
    }
}

#[async_trait]
impl PolicyEngine for BasicPolicyEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn decide(&self, input: PolicyInput) -> PolicyDecision {
        let mut caps = input.caps;

        // Start from the requested subset, or the whole registry.
        let candidates: Vec<&ToolMetadata> = if input.requested.is_empty() {
            input.tools.iter().collect()
        } else {
            input
                .requested
                .iter()
                .filter_map(|id| input.tools.iter().find(|t| &t.id == id))
                .collect()
        };

        let mut allowed: Vec<ToolName> = Vec::new();
        for tool in candidates {
            if self.admits(tool) && !allowed.contains(&tool.id) {
                allowed.push(tool.id.clone());
            }
        }

        if let Some(hint) = &input.last_hint {
            match (&hint.tool, hint.reason) {
                (Some(tool), RetryReason::ToolUnavailable) => {
                    allowed.retain(|t| t != tool);
                }
                (Some(tool), _) if hint.restrict_to_tool => {
                    if allowed.contains(tool) {
                        allowed = vec![tool.clone()];
                        caps.remaining_tool_calls = caps.remaining_tool_calls.max(1);
                    }
                }
                _ => {}
            }
        }

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_POLICY_ENGINE.to_string(), self.id.clone());

        PolicyDecision {
            allowed_tools: allowed,
            caps,
            labels,
            metadata: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, tags: &[&str]) -> ToolMetadata {
        ToolMetadata {
            id: ToolName::parse(name).unwrap(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn caps(remaining: u32) -> CapsState {
        CapsState {
            remaining_tool_calls: remaining,
            consecutive_failed_turns: 0,
        }
    }

    fn input(tools: Vec<ToolMetadata>) -> PolicyInput {
        PolicyInput {
            tools,
            requested: vec![],
            caps: caps(5),
            last_hint: None,
        }
    }

    #[tokio::test]
    async fn test_allow_all_by_default() {
        let engine = BasicPolicyEngine::allow_all();
        let decision = engine
            .decide(input(vec![tool("svc.ts.a", &[]), tool("svc.ts.b", &[])]))
            .await;

        assert_eq!(decision.allowed_tools.len(), 2);
        assert_eq!(decision.labels[LABEL_POLICY_ENGINE], "basic");
    }

    #[tokio::test]
    async fn test_block_by_tag() {
        let engine = BasicPolicyEngine::new("strict").block_tag("dangerous");
        let decision = engine
            .decide(input(vec![
                tool("svc.ts.safe", &["io"]),
                tool("svc.ts.rm", &["dangerous"]),
            ]))
            .await;

        assert_eq!(decision.allowed_tools.len(), 1);
        assert_eq!(decision.allowed_tools[0].as_str(), "svc.ts.safe");
    }

    #[tokio::test]
    async fn test_allow_list_excludes_others() {
        let engine = BasicPolicyEngine::new("narrow").allow_tool("svc.ts.a");
        let decision = engine
            .decide(input(vec![tool("svc.ts.a", &[]), tool("svc.ts.b", &[])]))
            .await;

        assert_eq!(decision.allowed_tools.len(), 1);
    }

    #[tokio::test]
    async fn test_requested_subset_is_respected() {
        let engine = BasicPolicyEngine::allow_all();
        let mut policy_input = input(vec![tool("svc.ts.a", &[]), tool("svc.ts.b", &[])]);
        policy_input.requested = vec![ToolName::parse("svc.ts.b").unwrap()];

        let decision = engine.decide(policy_input).await;
        assert_eq!(decision.allowed_tools, vec![ToolName::parse("svc.ts.b").unwrap()]);
    }

    #[tokio::test]
    async fn test_restrict_to_tool_hint() {
        let engine = BasicPolicyEngine::allow_all();
        let mut policy_input = input(vec![tool("svc.ts.a", &[]), tool("svc.ts.b", &[])]);
        policy_input.caps = caps(0);
        policy_input.last_hint = Some(
            RetryHint::new(RetryReason::RateLimited)
                .for_tool(ToolName::parse("svc.ts.a").unwrap())
                .restricting(),
        );

        let decision = engine.decide(policy_input).await;

        assert_eq!(decision.allowed_tools, vec![ToolName::parse("svc.ts.a").unwrap()]);
        // Remaining calls lower-bounded so the retry can actually happen.
        assert_eq!(decision.caps.remaining_tool_calls, 1);
    }

    #[tokio::test]
    async fn test_tool_unavailable_hint_removes_tool() {
        let engine = BasicPolicyEngine::allow_all();
        let mut policy_input = input(vec![tool("svc.ts.a", &[]), tool("svc.ts.b", &[])]);
        policy_input.last_hint = Some(
            RetryHint::new(RetryReason::ToolUnavailable)
                .for_tool(ToolName::parse("svc.ts.a").unwrap()),
        );

        let decision = engine.decide(policy_input).await;
        assert_eq!(decision.allowed_tools, vec![ToolName::parse("svc.ts.b").unwrap()]);
    }

    #[tokio::test]
    async fn test_allowed_tools_deduplicated() {
        let engine = BasicPolicyEngine::allow_all();
        let mut policy_input = input(vec![tool("svc.ts.a", &[])]);
        policy_input.requested = vec![
            ToolName::parse("svc.ts.a").unwrap(),
            ToolName::parse("svc.ts.a").unwrap(),
        ];

        let decision = engine.decide(policy_input).await;
        assert_eq!(decision.allowed_tools.len(), 1);
    }
}
