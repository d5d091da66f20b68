// Planner contract: inputs, the three-way plan result, caps and budgets

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::ToolName;
use crate::run::{Message, RunContext};
use crate::tools::{RetryHint, ToolRequest, ToolResult};

/// Tool surface offered to the planner for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolHandle {
    pub name: ToolName,
    pub description: String,
}

/// Input to the first planning call of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInput {
    pub context: RunContext,
    pub messages: Vec<Message>,
    pub allowed_tools: Vec<ToolHandle>,
    pub caps: CapsState,
}

/// Input to every subsequent planning call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResumeInput {
    pub context: RunContext,
    pub results: Vec<ToolResult>,
    pub allowed_tools: Vec<ToolHandle>,
    pub caps: CapsState,
    /// Most recent hint issued by a failing tool, if any
    pub retry_hint: Option<RetryHint>,
    /// When set, the planner must produce a final response for this reason
    pub finalize_reason: Option<String>,
}

/// What the planner wants next. Exactly one alternative per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanResult {
    /// Terminal assistant message
    Final { message: Message },
    /// Tool invocations to execute before resuming
    ToolCalls { calls: Vec<ToolRequest> },
    /// Suspend until external input arrives
    Await {
        items: Vec<AwaitItem>,
        /// Turn-level deadline applied to items without their own
        timeout_ms: Option<u64>,
    },
}

/// Kind of external input an await item waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AwaitKind {
    Clarification,
    ExternalTool,
    Confirmation,
}

/// One pending external input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitItem {
    pub kind: AwaitKind,
    /// Correlation id matched against incoming signal payloads
    pub id: String,
    pub prompt: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Resource limits for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPolicy {
    pub max_tool_calls: u32,
    /// Turns in which every call failed before the run is stopped
    pub max_consecutive_failed_tool_calls: Option<u32>,
    #[serde(with = "option_duration_millis")]
    pub time_budget: Option<Duration>,
    #[serde(with = "option_duration_millis")]
    pub plan_timeout: Option<Duration>,
    #[serde(with = "option_duration_millis")]
    pub tool_timeout: Option<Duration>,
    /// Per-tool override of `tool_timeout`, keyed by full tool name
    #[serde(with = "duration_map_millis", default)]
    pub per_tool_timeout: BTreeMap<String, Duration>,
    pub interrupts_allowed: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_tool_calls: 32,
            max_consecutive_failed_tool_calls: None,
            time_budget: None,
            plan_timeout: None,
            tool_timeout: None,
            per_tool_timeout: BTreeMap::new(),
            interrupts_allowed: true,
        }
    }
}

impl RunPolicy {
    pub fn with_max_tool_calls(mut self, max: u32) -> Self {
        self.max_tool_calls = max;
        self
    }

    pub fn with_failure_breaker(mut self, max_consecutive: u32) -> Self {
        self.max_consecutive_failed_tool_calls = Some(max_consecutive);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_per_tool_timeout(mut self, tool: impl Into<String>, timeout: Duration) -> Self {
        self.per_tool_timeout.insert(tool.into(), timeout);
        self
    }

    /// Effective timeout for one tool: per-tool override, else the default
    pub fn timeout_for(&self, tool: &ToolName) -> Option<Duration> {
        self.per_tool_timeout
            .get(tool.as_str())
            .copied()
            .or(self.tool_timeout)
    }
}

/// Mutable cap accounting for one run.
///
/// `remaining_tool_calls` never increases; the consecutive-failure counter
/// resets to zero on any turn containing a successful call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsState {
    pub remaining_tool_calls: u32,
    pub consecutive_failed_turns: u32,
}

impl CapsState {
    pub fn from_policy(policy: &RunPolicy) -> Self {
        Self {
            remaining_tool_calls: policy.max_tool_calls,
            consecutive_failed_turns: 0,
        }
    }

    /// Spend one tool call from the budget
    pub fn spend(&mut self) {
        self.remaining_tool_calls = self.remaining_tool_calls.saturating_sub(1);
    }

    /// Record the failure outcome of one completed turn of tool calls
    pub fn record_turn(&mut self, all_failed: bool) {
        if all_failed {
            self.consecutive_failed_turns += 1;
        } else {
            self.consecutive_failed_turns = 0;
        }
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

mod duration_map_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S>(
        map: &BTreeMap<String, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis: BTreeMap<&String, u64> =
            map.iter().map(|(k, d)| (k, d.as_millis() as u64)).collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: BTreeMap<String, u64> = BTreeMap::deserialize(deserializer)?;
        Ok(millis
            .into_iter()
            .map(|(k, m)| (k, Duration::from_millis(m)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{RunId, TurnId};

    fn context() -> RunContext {
        RunContext {
            run_id: RunId::new("r1"),
            attempt: 1,
            labels: BTreeMap::new(),
            max_duration: None,
            session_id: None,
            turn_id: TurnId::new("t1"),
            parent_tool_call_id: None,
        }
    }

    #[test]
    fn test_plan_result_tagged_serialization() {
        let result = PlanResult::Final {
            message: Message::assistant("done"),
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"type\":\"final\""));

        let parsed: PlanResult = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, PlanResult::Final { .. }));
    }

    #[test]
    fn test_await_plan_round_trip() {
        let result = PlanResult::Await {
            items: vec![AwaitItem {
                kind: AwaitKind::Clarification,
                id: "q1".into(),
                prompt: Some("which region?".into()),
                timeout_ms: Some(5_000),
            }],
            timeout_ms: Some(30_000),
        };

        let json = serde_json::to_string(&result).unwrap();
        let parsed: PlanResult = serde_json::from_str(&json).unwrap();
        match parsed {
            PlanResult::Await { items, timeout_ms } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].kind, AwaitKind::Clarification);
                assert_eq!(timeout_ms, Some(30_000));
            }
            other => panic!("expected await, got {other:?}"),
        }
    }

    #[test]
    fn test_caps_spend_never_underflows() {
        let mut caps = CapsState {
            remaining_tool_calls: 1,
            consecutive_failed_turns: 0,
        };
        caps.spend();
        caps.spend();
        assert_eq!(caps.remaining_tool_calls, 0);
    }

    #[test]
    fn test_caps_failure_counter_resets_on_success() {
        let mut caps = CapsState {
            remaining_tool_calls: 5,
            consecutive_failed_turns: 0,
        };
        caps.record_turn(true);
        caps.record_turn(true);
        assert_eq!(caps.consecutive_failed_turns, 2);

        caps.record_turn(false);
        assert_eq!(caps.consecutive_failed_turns, 0);
    }

    #[test]
    fn test_policy_timeout_lookup() {
        let policy = RunPolicy::default()
            .with_tool_timeout(Duration::from_secs(30))
            .with_per_tool_timeout("svc.ts.slow", Duration::from_secs(120));

        let slow = ToolName::parse("svc.ts.slow").unwrap();
        let fast = ToolName::parse("svc.ts.fast").unwrap();

        assert_eq!(policy.timeout_for(&slow), Some(Duration::from_secs(120)));
        assert_eq!(policy.timeout_for(&fast), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_policy_duration_serde() {
        let policy = RunPolicy::default()
            .with_time_budget(Duration::from_millis(1500))
            .with_per_tool_timeout("svc.ts.a", Duration::from_secs(2));

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RunPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.time_budget, Some(Duration::from_millis(1500)));
        assert_eq!(
            parsed.per_tool_timeout["svc.ts.a"],
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_plan_input_round_trip() {
        let input = PlanInput {
            context: context(),
            messages: vec![Message::user("hi")],
            allowed_tools: vec![],
            caps: CapsState {
                remaining_tool_calls: 3,
                consecutive_failed_turns: 0,
            },
        };

        let json = serde_json::to_string(&input).unwrap();
        let parsed: PlanInput = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.caps.remaining_tool_calls, 3);
    }
}
